//! Field-level differences between desired and remote state.

use lbkit_core::{FieldMap, Json};
use lbkit_schema::Schema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// One changed field. Values of write-only fields are always redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Json>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
}

pub fn summarize(changes: &[FieldChange]) -> DiffSummary {
    let mut s = DiffSummary::default();
    for c in changes {
        match c.kind {
            ChangeKind::Added => s.adds += 1,
            ChangeKind::Updated => s.updates += 1,
            ChangeKind::Removed => s.removes += 1,
        }
    }
    s
}

/// Desired fields that differ from `current`. Fields holding write-only
/// values are always included: the device never reports them back.
pub fn field_delta(schema: &Schema, desired: &FieldMap, current: &FieldMap) -> FieldMap {
    let normalized = schema.decode(desired);
    desired
        .iter()
        .filter(|(name, _)| {
            let sensitive = schema.get(name).map(|f| f.contains_sensitive()).unwrap_or(false);
            sensitive || normalized.get(name.as_str()) != current.get(name.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Describe the move from `current` (absent when `None`) to `desired`.
/// With `replace`, fields of `current` missing from `desired` count as removed.
pub fn describe(schema: &Schema, current: Option<&FieldMap>, desired: &FieldMap, replace: bool) -> Vec<FieldChange> {
    let empty = FieldMap::new();
    let current = current.unwrap_or(&empty);
    let before = schema.redact(current);
    let after = schema.redact(&schema.normalize(desired));
    let mut out = Vec::new();
    for (name, value) in after.iter() {
        match before.get(name) {
            None => out.push(FieldChange { field: name.clone(), kind: ChangeKind::Added, before: None, after: Some(value.clone()) }),
            Some(old) if old != value || schema.is_sensitive(name) => out.push(FieldChange {
                field: name.clone(),
                kind: ChangeKind::Updated,
                before: Some(old.clone()),
                after: Some(value.clone()),
            }),
            Some(_) => {}
        }
    }
    if replace {
        for (name, old) in before.iter() {
            if !after.contains_key(name) && !schema.is_identity(name) {
                out.push(FieldChange { field: name.clone(), kind: ChangeKind::Removed, before: Some(old.clone()), after: None });
            }
        }
    }
    out
}

/// Every field of `current`, as removed.
pub fn removal(schema: &Schema, current: &FieldMap) -> Vec<FieldChange> {
    schema
        .redact(current)
        .into_iter()
        .filter(|(name, _)| !schema.is_identity(name))
        .map(|(field, old)| FieldChange { field, kind: ChangeKind::Removed, before: Some(old), after: None })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbkit_schema::{EnumDecl, FieldDecl, SchemaBuilder, TypeDescriptor};
    use serde_json::json;

    fn schema() -> Schema {
        SchemaBuilder::build(
            &TypeDescriptor::new("test.diff.key")
                .field(FieldDecl::str("index").identity())
                .field(FieldDecl::int("weight").optional())
                .field(FieldDecl::enumeration("state", EnumDecl::new("state", &[("enabled", 2), ("disabled", 3)])).optional())
                .field(FieldDecl::secret("passphrase").optional())
                .field(FieldDecl::int("ports").repeated().optional()),
        )
        .unwrap()
    }

    fn map(v: Json) -> FieldMap { v.as_object().cloned().unwrap() }

    #[test]
    fn delta_skips_equal_fields_and_keeps_secrets() {
        let s = schema();
        let current = map(json!({"index": "k", "weight": 1, "state": "enabled", "ports": [80]}));
        let desired = map(json!({"weight": 1, "state": 2, "passphrase": "pw", "ports": [80, 443]}));
        let delta = field_delta(&s, &desired, &current);
        let names: Vec<&str> = delta.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["passphrase", "ports"]);
    }

    #[test]
    fn describe_redacts_and_counts() {
        let s = schema();
        let current = map(json!({"index": "k", "weight": 1, "ports": [80]}));
        let desired = map(json!({"weight": 2, "passphrase": "pw"}));
        let changes = describe(&s, Some(&current), &desired, true);
        assert_eq!(summarize(&changes), DiffSummary { adds: 1, updates: 1, removes: 1 });
        let rendered = serde_json::to_string(&changes).unwrap();
        assert!(!rendered.contains("pw"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn removal_lists_non_identity_fields() {
        let s = schema();
        let changes = removal(&s, &map(json!({"index": "k", "weight": 1})));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "weight");
        assert_eq!(changes[0].kind, ChangeKind::Removed);
    }
}
