//! lbkit schema engine: derive validated input contracts from field declarations.
//!
//! Object types declare their fields through [`TypeDescriptor`] tables;
//! [`SchemaBuilder`] turns a table into an immutable [`Schema`] once per type
//! and caches it process-wide.

#![forbid(unsafe_code)]

use serde::Serialize;
use smallvec::SmallVec;

mod build;
mod codec;
mod coerce;
mod decl;
mod validate;

pub use build::{schema_for, SchemaBuilder};
pub use codec::prune_nulls;
pub use coerce::{args_payload, coerce, coerce_args, Arg, ArgMap, EnumValue};
pub use decl::{DeclaredType, EnumDecl, FieldDecl, TypeDescriptor};
pub use validate::Mode;

use lbkit_core::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Int,
    Bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumVariant {
    pub name: String,
    pub code: i64,
}

/// Allowed values of an enumeration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumChoices {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<String>,
}

impl EnumChoices {
    /// Variant names followed by extra literals.
    pub fn choices(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).chain(self.literals.iter().cloned()).collect()
    }

    pub fn code_of(&self, name: &str) -> Option<i64> {
        self.variants.iter().find(|v| v.name == name).map(|v| v.code)
    }

    pub fn name_of(&self, code: i64) -> Option<&str> {
        self.variants.iter().find(|v| v.code == code).map(|v| v.name.as_str())
    }

    pub fn is_literal(&self, token: &str) -> bool {
        self.literals.iter().any(|l| l == token)
    }

    pub fn accepts(&self, token: &str) -> bool {
        self.code_of(token).is_some() || self.is_literal(token)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarKind),
    Enum(EnumChoices),
    Struct(Schema),
    List(Box<FieldDescriptor>),
}

impl FieldKind {
    pub fn label(&self) -> String {
        match self {
            Self::Scalar(ScalarKind::String) => "str".into(),
            Self::Scalar(ScalarKind::Int) => "int".into(),
            Self::Scalar(ScalarKind::Bool) => "bool".into(),
            Self::Enum(e) => format!("enum({})", e.choices().join("|")),
            Self::Struct(s) => format!("struct {}", s.type_name),
            Self::List(inner) => format!("list[{}]", inner.kind.label()),
        }
    }
}

/// Validation rules for one configurable field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub sensitive: bool,
    pub identity: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
}

impl FieldDescriptor {
    pub fn is_list(&self) -> bool { matches!(self.kind, FieldKind::List(_)) }

    /// True when the value, or anything nested in it, is write-only.
    pub fn contains_sensitive(&self) -> bool {
        if self.sensitive {
            return true;
        }
        match &self.kind {
            FieldKind::Struct(s) => s.fields.iter().any(|f| f.contains_sensitive()),
            FieldKind::List(inner) => inner.contains_sensitive(),
            _ => false,
        }
    }
}

/// Input contract for one object type. Field order is display order only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    pub type_name: String,
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> { self.fields.iter() }

    pub fn identity_fields(&self) -> SmallVec<[&FieldDescriptor; 4]> {
        self.fields.iter().filter(|f| f.identity).collect()
    }

    pub fn is_identity(&self, name: &str) -> bool {
        self.get(name).map(|f| f.identity).unwrap_or(false)
    }

    pub fn list_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_list())
    }

    pub fn has_list_fields(&self) -> bool { self.list_fields().next().is_some() }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.get(name).map(|f| f.sensitive).unwrap_or(false)
    }
}
