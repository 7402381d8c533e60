use lbkit_core::{FieldMap, Json, ObjectKey, ValidationError};

use crate::{FieldDescriptor, FieldKind, ScalarKind, Schema};

/// How strictly `required` is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every required field must be present (object creation).
    Full,
    /// Only supplied fields are checked (updates, appends).
    Partial,
}

impl Schema {
    /// Check supplied fields against the contract. `null` counts as "not supplied".
    pub fn validate(&self, fields: &FieldMap, mode: Mode) -> Result<(), ValidationError> {
        self.validate_at("", fields, mode)
    }

    fn validate_at(&self, prefix: &str, fields: &FieldMap, mode: Mode) -> Result<(), ValidationError> {
        for (name, value) in fields.iter() {
            let path = join(prefix, name);
            let desc = self.get(name).ok_or_else(|| ValidationError::UnknownField(path.clone()))?;
            if value.is_null() {
                continue;
            }
            check_value(desc, value, &path, mode)?;
        }
        if mode == Mode::Full {
            for f in self.fields.iter().filter(|f| f.required) {
                if fields.get(&f.name).map_or(true, Json::is_null) {
                    return Err(ValidationError::MissingRequired(join(prefix, &f.name)));
                }
            }
        }
        Ok(())
    }

    /// Identity fields must all be present; nothing else may be.
    pub fn validate_key(&self, key: &ObjectKey) -> Result<(), ValidationError> {
        for (name, value) in key.fields().iter() {
            let desc = self.get(name).ok_or_else(|| ValidationError::UnknownField(name.clone()))?;
            if !desc.identity {
                return Err(ValidationError::Invalid { path: name.clone(), message: "not an identity field".into() });
            }
            if !value.is_null() {
                check_value(desc, value, name, Mode::Full)?;
            }
        }
        for f in self.identity_fields() {
            if key.get(&f.name).map_or(true, Json::is_null) {
                return Err(ValidationError::MissingRequired(f.name.clone()));
            }
        }
        Ok(())
    }
}

fn check_value(desc: &FieldDescriptor, value: &Json, path: &str, mode: Mode) -> Result<(), ValidationError> {
    let wrong = |expected: &'static str| ValidationError::WrongKind { path: path.to_string(), expected, found: kind_of(value) };
    match &desc.kind {
        FieldKind::Scalar(ScalarKind::String) => {
            if !value.is_string() { return Err(wrong("string")); }
        }
        FieldKind::Scalar(ScalarKind::Int) => {
            if value.as_i64().is_none() { return Err(wrong("integer")); }
        }
        FieldKind::Scalar(ScalarKind::Bool) => {
            if !value.is_boolean() { return Err(wrong("boolean")); }
        }
        FieldKind::Enum(choices) => match value {
            Json::String(s) if choices.accepts(s) => {}
            Json::String(s) => {
                return Err(ValidationError::NotAChoice { path: path.to_string(), value: s.clone(), choices: choices.choices() });
            }
            // Device codes are accepted as-is.
            Json::Number(n) if n.as_i64().and_then(|c| choices.name_of(c)).is_some() => {}
            _ => return Err(wrong("enumeration name")),
        },
        FieldKind::Struct(schema) => match value {
            Json::Object(obj) => schema.validate_at(path, obj, mode)?,
            _ => return Err(wrong("object")),
        },
        FieldKind::List(inner) => match value {
            Json::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    if item.is_null() {
                        return Err(ValidationError::WrongKind { path: item_path, expected: "list element", found: "null" });
                    }
                    // New list entries are always complete.
                    check_value(inner, item, &item_path, Mode::Full)?;
                }
            }
            _ => return Err(wrong("list")),
        },
    }
    Ok(())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{}.{}", prefix, name) }
}

pub(crate) fn kind_of(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "object",
    }
}
