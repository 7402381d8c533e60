//! Field-registration table: how object types and operation arguments declare their fields.

use lbkit_core::Json;

/// Declared type of one field, before schema derivation.
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredType {
    Str,
    Int,
    Bool,
    /// Write-only string (passwords, key material).
    Secret,
    Enum(EnumDecl),
    Struct(TypeDescriptor),
    /// Not expressible as an input contract; rejected by the builder.
    Float,
    /// A device-native type the builder has no mapping for.
    Opaque(&'static str),
}

impl DeclaredType {
    pub fn label(&self) -> String {
        match self {
            Self::Str => "str".into(),
            Self::Int => "int".into(),
            Self::Bool => "bool".into(),
            Self::Secret => "secret".into(),
            Self::Enum(e) => format!("enum {}", e.name),
            Self::Struct(t) => format!("struct {}", t.name),
            Self::Float => "float".into(),
            Self::Opaque(name) => (*name).to_string(),
        }
    }
}

/// Closed enumeration: named variants with their device codes, plus literal
/// tokens the device accepts verbatim (forward-compatible values).
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: &'static str,
    pub variants: Vec<(&'static str, i64)>,
    pub extra_literals: Vec<&'static str>,
}

impl EnumDecl {
    pub fn new(name: &'static str, variants: &[(&'static str, i64)]) -> Self {
        Self { name, variants: variants.to_vec(), extra_literals: Vec::new() }
    }

    pub fn with_literals(mut self, literals: &[&'static str]) -> Self {
        self.extra_literals.extend_from_slice(literals);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: &'static str,
    pub ty: DeclaredType,
    pub optional: bool,
    pub repeated: bool,
    pub identity: bool,
    pub default: Option<Json>,
}

impl FieldDecl {
    pub fn new(name: &'static str, ty: DeclaredType) -> Self {
        Self { name, ty, optional: false, repeated: false, identity: false, default: None }
    }

    pub fn str(name: &'static str) -> Self { Self::new(name, DeclaredType::Str) }
    pub fn int(name: &'static str) -> Self { Self::new(name, DeclaredType::Int) }
    pub fn bool(name: &'static str) -> Self { Self::new(name, DeclaredType::Bool) }
    pub fn secret(name: &'static str) -> Self { Self::new(name, DeclaredType::Secret) }
    pub fn enumeration(name: &'static str, decl: EnumDecl) -> Self { Self::new(name, DeclaredType::Enum(decl)) }
    pub fn structure(name: &'static str, ty: TypeDescriptor) -> Self { Self::new(name, DeclaredType::Struct(ty)) }

    pub fn optional(mut self) -> Self { self.optional = true; self }
    pub fn repeated(mut self) -> Self { self.repeated = true; self }
    pub fn identity(mut self) -> Self { self.identity = true; self }

    pub fn default_value(mut self, v: impl Into<Json>) -> Self {
        self.default = Some(v.into());
        self
    }
}

/// Declaration of one object type (or operation argument list).
///
/// `name` is the type's identity: schemas are cached under it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub fields: Vec<FieldDecl>,
}

impl TypeDescriptor {
    pub fn new(name: &'static str) -> Self { Self { name, fields: Vec::new() } }

    pub fn field(mut self, f: FieldDecl) -> Self {
        self.fields.push(f);
        self
    }
}
