use std::collections::{BTreeMap, BTreeSet};

use lbkit_core::{FieldMap, Json, ObjectKey, OperationKind};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// object type → canonical key → stored fields (identity fields included).
pub type Layer = BTreeMap<String, BTreeMap<String, FieldMap>>;

/// One management operation as the device received it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagementRecord {
    pub operation: String,
    pub args: Json,
}

/// Everything the appliance remembers. Only the configuration part is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceState {
    /// Staged edits, not yet active.
    pub candidate: Layer,
    /// Active configuration.
    pub running: Layer,
    /// Startup configuration.
    pub flash: Layer,
    #[serde(default)]
    pub peer_syncs: u64,
    #[serde(default)]
    pub last_apply: Option<String>,
    #[serde(default)]
    pub last_save: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub ha_role: Option<String>,
    #[serde(default)]
    pub management_log: Vec<ManagementRecord>,

    #[serde(skip)]
    pub(crate) rejections: BTreeSet<(String, String)>,
    #[serde(skip)]
    pub(crate) failures: FxHashMap<OperationKind, String>,
    #[serde(skip)]
    pub(crate) calls: Vec<(String, OperationKind)>,
}

impl DeviceState {
    pub fn pending_apply(&self) -> bool { self.candidate != self.running }

    pub fn pending_save(&self) -> bool { self.running != self.flash }

    pub fn object(&self, object_type: &str, key: &ObjectKey) -> Option<&FieldMap> {
        self.candidate.get(object_type).and_then(|objs| objs.get(&key.to_string()))
    }
}

/// Describe how `to` differs from `from`, by object and field name only.
pub fn diff_layers(from: &Layer, to: &Layer) -> Vec<String> {
    let mut lines = Vec::new();
    let types: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    let empty = BTreeMap::new();
    for ty in types {
        let a = from.get(ty).unwrap_or(&empty);
        let b = to.get(ty).unwrap_or(&empty);
        let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        for key in keys {
            match (a.get(key), b.get(key)) {
                (None, Some(_)) => lines.push(format!("+ {}[{}]", ty, key)),
                (Some(_), None) => lines.push(format!("- {}[{}]", ty, key)),
                (Some(old), Some(new)) => {
                    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
                    for name in names {
                        if old.get(name) != new.get(name) {
                            lines.push(format!("~ {}[{}].{}", ty, key, name));
                        }
                    }
                }
                (None, None) => {}
            }
        }
    }
    lines
}
