//! lbkit core types: values, object keys, device operations and errors.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

mod config;
mod error;
mod secret;
mod session;

pub use config::ConnectionConfig;
pub use error::{
    DeviceError, Error, ErrorReport, ManagementError, ReconciliationError, SchemaError,
    TransactionError, UnknownOperationError, UnsupportedOperation, ValidationError,
};
pub use secret::Secret;
pub use session::{Connector, DeviceSession, Transaction, TxnState, Transport};

pub type Json = serde_json::Value;

/// Field name → value mapping, as exchanged with callers and the device.
pub type FieldMap = serde_json::Map<String, Json>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod prelude {
    pub use super::{
        DeviceError, DeviceSession, Error, FieldMap, Json, ObjectKey, OperationKind, RawResult,
        Secret, Transaction, Transport,
    };
}

/// Identity fields addressing one instance of an object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(FieldMap);

impl ObjectKey {
    pub fn new(fields: FieldMap) -> Self { Self(fields) }

    pub fn fields(&self) -> &FieldMap { &self.0 }

    pub fn get(&self, name: &str) -> Option<&Json> { self.0.get(name) }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn to_json(&self) -> Json { Json::Object(self.0.clone()) }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Map iteration is sorted, so the rendering is canonical.
        let mut first = true;
        for (k, v) in self.0.iter() {
            if !first { f.write_str(",")?; }
            first = false;
            match v {
                Json::String(s) => write!(f, "{}={}", k, s)?,
                other => write!(f, "{}={}", k, other)?,
            }
        }
        Ok(())
    }
}

/// Operation kinds understood by the device transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
    Append,
    Apply,
    Save,
    Revert,
    RevertApply,
    Diff,
    DiffFlash,
    ValidatePending,
    Sync,
    PendingState,
    Management,
}

impl OperationKind {
    /// Object-level writes; these dirty the session transaction.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete | Self::Append)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Append => "append",
            Self::Apply => "apply",
            Self::Save => "save",
            Self::Revert => "revert",
            Self::RevertApply => "revert_apply",
            Self::Diff => "diff",
            Self::DiffFlash => "diff_flash",
            Self::ValidatePending => "pending_configuration_validation",
            Self::Sync => "sync",
            Self::PendingState => "pending_state",
            Self::Management => "management",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Raw device reply. Shape depends on the operation:
/// reads return the object (or null when absent), appends `{"added": n}`,
/// deletes `{"deleted": bool}`, diffs an array of lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResult {
    pub body: Json,
}

impl RawResult {
    pub fn new(body: Json) -> Self { Self { body } }

    pub fn empty() -> Self { Self { body: Json::Null } }

    pub fn is_absent(&self) -> bool { self.body.is_null() }

    pub fn object(&self) -> Option<&FieldMap> { self.body.as_object() }

    pub fn added(&self) -> u64 {
        self.body.get("added").and_then(|v| v.as_u64()).unwrap_or(0)
    }

    pub fn deleted(&self) -> bool {
        self.body.get("deleted").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn lines(&self) -> Vec<String> {
        match &self.body {
            Json::Array(items) => items
                .iter()
                .map(|v| match v {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.body.get(name).and_then(|v| v.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_renders_sorted_pairs() {
        let mut m = FieldMap::new();
        m.insert("port".into(), serde_json::json!(80));
        m.insert("index".into(), serde_json::json!("real1"));
        let key = ObjectKey::new(m);
        assert_eq!(key.to_string(), "index=real1,port=80");
    }

    #[test]
    fn raw_result_accessors() {
        let r = RawResult::new(serde_json::json!({"added": 2, "deleted": true}));
        assert_eq!(r.added(), 2);
        assert!(r.deleted());
        let lines = RawResult::new(serde_json::json!(["+ a", "- b"])).lines();
        assert_eq!(lines, vec!["+ a".to_string(), "- b".to_string()]);
        assert!(RawResult::empty().is_absent());
    }

    #[test]
    fn only_object_writes_are_mutating() {
        assert!(OperationKind::Create.is_mutating());
        assert!(OperationKind::Append.is_mutating());
        assert!(!OperationKind::Read.is_mutating());
        assert!(!OperationKind::Apply.is_mutating());
        assert!(!OperationKind::Management.is_mutating());
    }
}
