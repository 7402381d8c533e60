use std::fmt;

use lbkit_core::{Error, FieldMap, Json, ObjectKey, ValidationError};
use lbkit_schema::{prune_nulls, Schema};
use serde::{Deserialize, Serialize};

fn max_doc_bytes() -> usize {
    std::env::var("LBKIT_MAX_DOC_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000)
}

fn max_doc_nodes() -> usize {
    std::env::var("LBKIT_MAX_DOC_NODES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100_000)
}

fn node_budget_exceeded(v: &Json, max: usize) -> bool {
    fn walk(v: &Json, cur: &mut usize, max: usize) {
        if *cur >= max { return; }
        *cur += 1;
        match v {
            Json::Object(map) => {
                for vv in map.values() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            Json::Array(arr) => {
                for vv in arr.iter() {
                    if *cur >= max { break; }
                    walk(vv, cur, max);
                }
            }
            _ => {}
        }
    }
    let mut count = 0usize;
    walk(v, &mut count, max);
    count >= max
}

/// What the caller wants to be true about one object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    #[default]
    Present,
    Absent,
    Read,
    Overwrite,
    Append,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Read => "read",
            Self::Overwrite => "overwrite",
            Self::Append => "append",
        }
    }

    pub fn is_mutating(self) -> bool { !matches!(self, Self::Read) }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Issue one revert when a mutating verb fails.
    #[serde(default)]
    pub revert_on_error: bool,
    /// Skip the device call when nothing differs.
    #[serde(default)]
    pub write_on_change: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    pub object_type: String,
    pub key: ObjectKey,
    /// Partial: only the fields the caller cares about.
    pub fields: FieldMap,
    pub verb: Verb,
    pub options: Options,
}

impl DesiredState {
    pub fn new(object_type: impl Into<String>, key: ObjectKey, fields: FieldMap, verb: Verb) -> Self {
        Self { object_type: object_type.into(), key, fields, verb, options: Options::default() }
    }

    pub fn with_options(mut self, options: Options) -> Self { self.options = options; self }

    /// Split flat parameters into identity key and fields. `null` values are dropped.
    pub fn from_parameters(schema: &Schema, parameters: &FieldMap, verb: Verb, options: Options) -> Self {
        let mut key = FieldMap::new();
        let mut fields = FieldMap::new();
        for (name, value) in prune_nulls(parameters) {
            if schema.is_identity(&name) {
                key.insert(name, value);
            } else {
                fields.insert(name, value);
            }
        }
        Self { object_type: schema.type_name.clone(), key: ObjectKey::new(key), fields, verb, options }
    }
}

/// One reconciliation request as written in a YAML or JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    pub object: String,
    #[serde(default)]
    pub state: Verb,
    #[serde(default)]
    pub parameters: FieldMap,
    #[serde(default)]
    pub revert_on_error: bool,
    #[serde(default)]
    pub write_on_change: bool,
}

impl Document {
    pub fn options(&self) -> Options {
        Options { revert_on_error: self.revert_on_error, write_on_change: self.write_on_change }
    }

    pub fn desired(&self, schema: &Schema) -> DesiredState {
        DesiredState::from_parameters(schema, &self.parameters, self.state, self.options())
    }

    /// Parse every document in a YAML stream (JSON is accepted too).
    pub fn parse_all(text: &str) -> Result<Vec<Document>, Error> {
        if text.len() > max_doc_bytes() {
            return Err(invalid(format!("payload too large (>{} bytes)", max_doc_bytes())));
        }
        let mut docs = Vec::new();
        for (i, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = Json::deserialize(de).map_err(|e| invalid(format!("document {}: {}", i, e)))?;
            if value.is_null() {
                continue;
            }
            if node_budget_exceeded(&value, max_doc_nodes()) {
                return Err(invalid(format!("document {} too complex (>{} nodes)", i, max_doc_nodes())));
            }
            let doc: Document = serde_json::from_value(value).map_err(|e| invalid(format!("document {}: {}", i, e)))?;
            docs.push(doc);
        }
        Ok(docs)
    }
}

fn invalid(message: String) -> Error { ValidationError::Invalid { path: "document".into(), message }.into() }
