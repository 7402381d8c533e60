use std::sync::{Arc, Mutex};

use lbkit_core::SchemaError;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::decl::{DeclaredType, EnumDecl, FieldDecl, TypeDescriptor};
use crate::{EnumChoices, EnumVariant, FieldDescriptor, FieldKind, ScalarKind, Schema};

static CACHE: Lazy<Mutex<FxHashMap<&'static str, Arc<Schema>>>> = Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Derives schemas from type descriptors. Pure and deterministic.
pub struct SchemaBuilder;

impl SchemaBuilder {
    /// Build without consulting the cache.
    pub fn build(desc: &TypeDescriptor) -> Result<Schema, SchemaError> {
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(desc.fields.len());
        for decl in desc.fields.iter() {
            if fields.iter().any(|f| f.name == decl.name) {
                return Err(SchemaError::DuplicateField { type_name: desc.name.to_string(), field: decl.name.to_string() });
            }
            fields.push(Self::field(desc.name, decl)?);
        }
        Ok(Schema { type_name: desc.name.to_string(), fields })
    }

    fn field(type_name: &str, decl: &FieldDecl) -> Result<FieldDescriptor, SchemaError> {
        let (kind, sensitive) = match &decl.ty {
            DeclaredType::Str => (FieldKind::Scalar(ScalarKind::String), false),
            DeclaredType::Int => (FieldKind::Scalar(ScalarKind::Int), false),
            DeclaredType::Bool => (FieldKind::Scalar(ScalarKind::Bool), false),
            DeclaredType::Secret => (FieldKind::Scalar(ScalarKind::String), true),
            DeclaredType::Enum(e) => {
                // A list of enum names has no unambiguous device encoding.
                if decl.repeated {
                    return Err(SchemaError::RepeatedEnum { type_name: type_name.to_string(), field: decl.name.to_string() });
                }
                (FieldKind::Enum(choices(e)), false)
            }
            DeclaredType::Struct(inner) => (FieldKind::Struct(Self::build(inner)?), false),
            DeclaredType::Float | DeclaredType::Opaque(_) => {
                return Err(SchemaError::UnsupportedType {
                    type_name: type_name.to_string(),
                    field: decl.name.to_string(),
                    declared: decl.ty.label(),
                });
            }
        };
        if decl.identity && decl.repeated {
            return Err(SchemaError::RepeatedIdentity { type_name: type_name.to_string(), field: decl.name.to_string() });
        }
        let kind = if decl.repeated {
            FieldKind::List(Box::new(FieldDescriptor {
                name: decl.name.to_string(),
                kind,
                required: true,
                sensitive,
                identity: false,
                default: None,
            }))
        } else {
            kind
        };
        Ok(FieldDescriptor {
            name: decl.name.to_string(),
            kind,
            required: decl.identity || !decl.optional,
            sensitive,
            identity: decl.identity,
            default: decl.default.clone(),
        })
    }
}

fn choices(e: &EnumDecl) -> EnumChoices {
    EnumChoices {
        name: e.name.to_string(),
        variants: e.variants.iter().map(|(n, c)| EnumVariant { name: (*n).to_string(), code: *c }).collect(),
        literals: e.extra_literals.iter().map(|l| (*l).to_string()).collect(),
    }
}

/// Cached schema for a descriptor, keyed by the descriptor's name.
///
/// Failed builds are not cached, so a malformed descriptor fails every time.
pub fn schema_for(desc: &TypeDescriptor) -> Result<Arc<Schema>, SchemaError> {
    let mut cache = CACHE.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(hit) = cache.get(desc.name) {
        return Ok(hit.clone());
    }
    let schema = Arc::new(SchemaBuilder::build(desc)?);
    debug!(type_name = desc.name, fields = schema.fields.len(), "schema built");
    cache.insert(desc.name, schema.clone());
    Ok(schema)
}
