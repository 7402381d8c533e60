//! Coercion of loosely-typed supplied values into declared argument types.

use std::collections::BTreeMap;

use lbkit_core::{FieldMap, Json, Secret, ValidationError};

use crate::validate::kind_of;
use crate::{FieldDescriptor, FieldKind, ScalarKind, Schema};

/// Enumeration value after coercion. `code` is `None` for extra literals,
/// which the device receives verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub code: Option<i64>,
}

/// A typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    Secret(Secret),
    Enum(EnumValue),
    List(Vec<Arg>),
    Struct(ArgMap),
}

pub type ArgMap = BTreeMap<String, Arg>;

impl Arg {
    /// Device representation. This is the only place secrets are exposed.
    pub fn to_payload(&self) -> Json {
        match self {
            Self::Str(s) => Json::String(s.clone()),
            Self::Int(i) => Json::from(*i),
            Self::Bool(b) => Json::Bool(*b),
            Self::Secret(s) => Json::String(s.expose().to_string()),
            Self::Enum(EnumValue { code: Some(code), .. }) => Json::from(*code),
            Self::Enum(EnumValue { name, code: None }) => Json::String(name.clone()),
            Self::List(items) => Json::Array(items.iter().map(Arg::to_payload).collect()),
            Self::Struct(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), v.to_payload())).collect()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self { Self::Int(i) => Some(*i), _ => None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { Self::Bool(b) => Some(*b), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Enum(e) => Some(&e.name),
            _ => None,
        }
    }
}

/// Payload object for a whole argument map.
pub fn args_payload(args: &ArgMap) -> Json {
    Json::Object(args.iter().map(|(k, v)| (k.clone(), v.to_payload())).collect())
}

/// Coerce every declared argument present in `supplied`. Absent or `null`
/// arguments are omitted; undeclared ones are ignored.
pub fn coerce_args(schema: &Schema, supplied: &FieldMap) -> Result<ArgMap, ValidationError> {
    let mut out = ArgMap::new();
    for desc in schema.iter() {
        match supplied.get(&desc.name) {
            Some(v) if !v.is_null() => {
                out.insert(desc.name.clone(), coerce_at(desc, v, &desc.name)?);
            }
            _ if desc.required => return Err(ValidationError::MissingRequired(desc.name.clone())),
            _ => {}
        }
    }
    Ok(out)
}

pub fn coerce(desc: &FieldDescriptor, value: &Json) -> Result<Arg, ValidationError> { coerce_at(desc, value, &desc.name) }

fn coerce_at(desc: &FieldDescriptor, value: &Json, path: &str) -> Result<Arg, ValidationError> {
    let wrong = |expected: &'static str| ValidationError::WrongKind { path: path.to_string(), expected, found: kind_of(value) };
    match &desc.kind {
        FieldKind::Scalar(ScalarKind::String) => {
            let s = match value {
                Json::String(s) => s.clone(),
                Json::Number(n) => n.to_string(),
                _ => return Err(wrong("string")),
            };
            Ok(if desc.sensitive { Arg::Secret(Secret::new(s)) } else { Arg::Str(s) })
        }
        FieldKind::Scalar(ScalarKind::Int) => match value {
            Json::Number(n) => n.as_i64().map(Arg::Int).ok_or_else(|| wrong("integer")),
            Json::String(s) => s.trim().parse::<i64>().map(Arg::Int).map_err(|_| wrong("integer")),
            _ => Err(wrong("integer")),
        },
        FieldKind::Scalar(ScalarKind::Bool) => match value {
            Json::Bool(b) => Ok(Arg::Bool(*b)),
            Json::String(s) => parse_bool(s).map(Arg::Bool).ok_or_else(|| wrong("boolean")),
            _ => Err(wrong("boolean")),
        },
        FieldKind::Enum(choices) => match value {
            Json::String(s) => {
                if let Some(code) = choices.code_of(s) {
                    Ok(Arg::Enum(EnumValue { name: s.clone(), code: Some(code) }))
                } else if choices.is_literal(s) {
                    Ok(Arg::Enum(EnumValue { name: s.clone(), code: None }))
                } else {
                    Err(ValidationError::NotAChoice { path: path.to_string(), value: s.clone(), choices: choices.choices() })
                }
            }
            Json::Number(n) => n
                .as_i64()
                .and_then(|c| choices.name_of(c).map(|name| EnumValue { name: name.to_string(), code: Some(c) }))
                .map(Arg::Enum)
                .ok_or_else(|| wrong("enumeration name")),
            _ => Err(wrong("enumeration name")),
        },
        FieldKind::Struct(schema) => match value {
            Json::Object(obj) => {
                for name in obj.keys() {
                    if schema.get(name).is_none() {
                        return Err(ValidationError::UnknownField(format!("{}.{}", path, name)));
                    }
                }
                let mut out = ArgMap::new();
                for f in schema.iter() {
                    let sub = format!("{}.{}", path, f.name);
                    match obj.get(&f.name) {
                        Some(v) if !v.is_null() => {
                            out.insert(f.name.clone(), coerce_at(f, v, &sub)?);
                        }
                        _ if f.required => return Err(ValidationError::MissingRequired(sub)),
                        _ => {}
                    }
                }
                Ok(Arg::Struct(out))
            }
            _ => Err(wrong("object")),
        },
        FieldKind::List(inner) => {
            let items: Vec<Json> = match value {
                Json::Array(items) => items.clone(),
                // Command-line friendly: "80,8080".
                Json::String(s) if !matches!(inner.kind, FieldKind::Struct(_)) => {
                    s.split(',').map(|p| Json::String(p.trim().to_string())).filter(|p| p != "").collect()
                }
                _ => return Err(wrong("list")),
            };
            items
                .iter()
                .enumerate()
                .map(|(i, item)| coerce_at(inner, item, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Arg::List)
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
