//! Conversions between caller values and the device representation.

use lbkit_core::{FieldMap, Json, Secret};

use crate::{FieldDescriptor, FieldKind, Schema};

#[derive(Clone, Copy)]
enum Pass {
    Encode,
    Decode,
    Normalize,
    Redact,
}

impl Schema {
    /// Device encoding: enumeration names become their codes, extra literals
    /// pass through, secrets are sent as given.
    pub fn encode(&self, fields: &FieldMap) -> FieldMap { self.walk(fields, Pass::Encode) }

    /// Normalize a device reply: drop unknown and write-only fields, turn
    /// enumeration codes back into names.
    pub fn decode(&self, raw: &FieldMap) -> FieldMap { self.walk(raw, Pass::Decode) }

    /// Enumeration codes become names; everything else is kept as given.
    pub fn normalize(&self, fields: &FieldMap) -> FieldMap { self.walk(fields, Pass::Normalize) }

    /// Copy safe for logs, statuses and diffs.
    pub fn redact(&self, fields: &FieldMap) -> FieldMap { self.walk(fields, Pass::Redact) }

    fn walk(&self, fields: &FieldMap, pass: Pass) -> FieldMap {
        let mut out = FieldMap::new();
        for (name, value) in fields.iter() {
            match self.get(name) {
                Some(desc) => {
                    if desc.sensitive && matches!(pass, Pass::Decode) {
                        continue;
                    }
                    out.insert(name.clone(), convert(desc, value, pass));
                }
                None => {
                    if !matches!(pass, Pass::Decode) {
                        out.insert(name.clone(), value.clone());
                    }
                }
            }
        }
        out
    }
}

fn convert(desc: &FieldDescriptor, value: &Json, pass: Pass) -> Json {
    if desc.sensitive && matches!(pass, Pass::Redact) && !value.is_null() {
        return Json::String(Secret::REDACTED.to_string());
    }
    match (&desc.kind, value) {
        (FieldKind::Enum(choices), Json::String(name)) if matches!(pass, Pass::Encode) => match choices.code_of(name) {
            Some(code) => Json::from(code),
            None => value.clone(),
        },
        (FieldKind::Enum(choices), Json::Number(n)) if matches!(pass, Pass::Decode | Pass::Normalize) => {
            match n.as_i64().and_then(|c| choices.name_of(c)) {
                Some(name) => Json::String(name.to_string()),
                None => value.clone(),
            }
        }
        (FieldKind::Struct(schema), Json::Object(obj)) => Json::Object(schema.walk(obj, pass)),
        (FieldKind::List(inner), Json::Array(items)) => Json::Array(items.iter().map(|i| convert(inner, i, pass)).collect()),
        _ => value.clone(),
    }
}

/// Drop `null` entries recursively; `null` means "not specified".
pub fn prune_nulls(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Json::Object(obj) => Json::Object(prune_nulls(obj)),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}
