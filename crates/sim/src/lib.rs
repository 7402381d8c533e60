//! lbkit-sim: an in-memory load-balancer appliance behind the `Transport` trait.
//!
//! Models the parts of a real appliance that reconciliation depends on:
//! a candidate/running/flash configuration split, field-by-field application
//! that can stop half-way, and pending-state reporting.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lbkit_core::{
    ConnectionConfig, Connector, DeviceError, FieldMap, Json, ObjectKey, OperationKind, RawResult, Transport,
};
use serde_json::json;
use tracing::{debug, info};

mod state;

pub use state::{diff_layers, DeviceState, Layer, ManagementRecord};

/// Shared handle to one simulated appliance. Clones see the same device, so
/// a test can keep one while a session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryDevice {
    inner: Arc<Mutex<DeviceState>>,
    path: Option<PathBuf>,
}

impl MemoryDevice {
    pub fn new() -> Self { Self::default() }

    /// Load device state from `path` (empty device when the file does not
    /// exist yet). Every state change is written back.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| DeviceError::Unreachable(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&text).map_err(|e| DeviceError::Unreachable(format!("{}: {}", path.display(), e)))?
        } else {
            DeviceState::default()
        };
        info!(path = %path.display(), "simulated device opened");
        Ok(Self { inner: Arc::new(Mutex::new(state)), path: Some(path) })
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> { self.inner.lock().unwrap_or_else(|p| p.into_inner()) }

    /// Snapshot of the whole device state.
    pub fn state(&self) -> DeviceState { self.lock().clone() }

    /// Stored fields of an object in the candidate configuration.
    pub fn object(&self, object_type: &str, key: &ObjectKey) -> Option<FieldMap> {
        self.lock().object(object_type, key).cloned()
    }

    /// Seed an object directly into every layer, as if configured and saved earlier.
    pub fn seed(&self, object_type: &str, key: &ObjectKey, fields: FieldMap) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let mut obj = key.fields().clone();
        obj.extend(fields);
        for layer in [&mut st.candidate, &mut st.running, &mut st.flash] {
            layer.entry(object_type.to_string()).or_default().insert(key.to_string(), obj.clone());
        }
    }

    /// Make the device refuse `field` of `object_type` on create/update.
    /// Fields before it in the request are still applied.
    pub fn reject_field(&self, object_type: &str, field: &str) {
        self.lock().rejections.insert((object_type.to_string(), field.to_string()));
    }

    /// Make every call of `op` fail with `message`.
    pub fn fail_on(&self, op: OperationKind, message: &str) {
        self.lock().failures.insert(op, message.to_string());
    }

    pub fn clear_faults(&self) {
        let mut st = self.lock();
        st.rejections.clear();
        st.failures.clear();
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<(String, OperationKind)> { self.lock().calls.clone() }

    pub fn count(&self, op: OperationKind) -> usize { self.lock().calls.iter().filter(|(_, o)| *o == op).count() }

    pub fn reset_calls(&self) { self.lock().calls.clear(); }

    fn persist(&self, st: &DeviceState) -> Result<(), DeviceError> {
        let Some(path) = &self.path else { return Ok(()) };
        let text = serde_json::to_string_pretty(st).map_err(|e| DeviceError::Unreachable(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| DeviceError::Unreachable(format!("{}: {}", path.display(), e)))
    }
}

impl Transport for MemoryDevice {
    fn invoke(&mut self, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError> {
        let mut st = self.lock();
        st.calls.push((object_type.to_string(), op));
        if let Some(message) = st.failures.get(&op).cloned() {
            debug!(object_type, op = %op, "injected failure");
            return Err(DeviceError::rejected(object_type, op, message));
        }
        let res = handle(&mut st, object_type, op, payload);
        // Written even on failure: a rejected write may have been partially applied.
        if !read_only(op) {
            self.persist(&st)?;
        }
        res
    }
}

/// A `MemoryDevice` can stand in as its own connector.
impl Connector for MemoryDevice {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Transport>, DeviceError> {
        debug!(endpoint = %config.endpoint(), "connecting to simulated device");
        Ok(Box::new(self.clone()))
    }
}

fn read_only(op: OperationKind) -> bool {
    matches!(
        op,
        OperationKind::Read | OperationKind::Diff | OperationKind::DiffFlash | OperationKind::PendingState | OperationKind::ValidatePending
    )
}

fn handle(st: &mut DeviceState, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError> {
    match op {
        OperationKind::Read => {
            let key = key_of(object_type, op, payload)?;
            Ok(RawResult::new(st.object(object_type, &key).cloned().map(Json::Object).unwrap_or(Json::Null)))
        }
        OperationKind::Create | OperationKind::Update => write_object(st, object_type, op, payload),
        OperationKind::Delete => {
            let key = key_of(object_type, op, payload)?;
            let deleted = st.candidate.get_mut(object_type).and_then(|objs| objs.remove(&key.to_string())).is_some();
            Ok(RawResult::new(json!({ "deleted": deleted })))
        }
        OperationKind::Append => append(st, object_type, payload),
        OperationKind::Apply => {
            st.running = st.candidate.clone();
            st.last_apply = Some(chrono::Utc::now().to_rfc3339());
            Ok(RawResult::empty())
        }
        OperationKind::Save => {
            st.flash = st.running.clone();
            st.last_save = Some(chrono::Utc::now().to_rfc3339());
            Ok(RawResult::empty())
        }
        OperationKind::Revert => {
            st.candidate = st.running.clone();
            Ok(RawResult::empty())
        }
        OperationKind::RevertApply => {
            st.running = st.flash.clone();
            st.candidate = st.flash.clone();
            Ok(RawResult::empty())
        }
        OperationKind::Diff => Ok(RawResult::new(json!(diff_layers(&st.running, &st.candidate)))),
        OperationKind::DiffFlash => Ok(RawResult::new(json!(diff_layers(&st.flash, &st.running)))),
        OperationKind::ValidatePending => {
            let changes = diff_layers(&st.running, &st.candidate).len();
            Ok(RawResult::new(json!({ "valid": true, "changes": changes })))
        }
        OperationKind::Sync => {
            st.peer_syncs += 1;
            Ok(RawResult::new(json!({ "peer_syncs": st.peer_syncs })))
        }
        OperationKind::PendingState => {
            Ok(RawResult::new(json!({ "pending_apply": st.pending_apply(), "pending_save": st.pending_save() })))
        }
        OperationKind::Management => management(st, object_type, payload),
    }
}

fn key_of(object_type: &str, op: OperationKind, payload: &Json) -> Result<ObjectKey, DeviceError> {
    match payload.get("key").and_then(Json::as_object) {
        Some(k) if !k.is_empty() => Ok(ObjectKey::new(k.clone())),
        _ => Err(DeviceError::rejected(object_type, op, "request carries no object key")),
    }
}

fn fields_of(payload: &Json) -> FieldMap { payload.get("fields").and_then(Json::as_object).cloned().unwrap_or_default() }

fn write_object(st: &mut DeviceState, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError> {
    let key = key_of(object_type, op, payload)?;
    let fields = fields_of(payload);
    let exists = st.object(object_type, &key).is_some();
    match (op, exists) {
        (OperationKind::Create, true) => return Err(DeviceError::rejected(object_type, op, format!("object [{}] already exists", key))),
        (OperationKind::Update, false) => return Err(DeviceError::rejected(object_type, op, format!("object [{}] does not exist", key))),
        _ => {}
    }
    let rejected: Vec<String> = st.rejections.iter().filter(|(t, _)| t == object_type).map(|(_, f)| f.clone()).collect();
    let obj = st
        .candidate
        .entry(object_type.to_string())
        .or_default()
        .entry(key.to_string())
        .or_insert_with(|| key.fields().clone());
    for (name, value) in fields.iter() {
        if rejected.iter().any(|r| r == name) {
            debug!(object_type, field = name.as_str(), "field rejected");
            return Err(DeviceError::Rejected {
                object_type: object_type.to_string(),
                operation: op,
                message: format!("field `{}` rejected", name),
                field: Some(name.clone()),
            });
        }
        obj.insert(name.clone(), value.clone());
    }
    Ok(RawResult::empty())
}

fn append(st: &mut DeviceState, object_type: &str, payload: &Json) -> Result<RawResult, DeviceError> {
    let op = OperationKind::Append;
    let key = key_of(object_type, op, payload)?;
    let obj = st
        .candidate
        .get_mut(object_type)
        .and_then(|objs| objs.get_mut(&key.to_string()))
        .ok_or_else(|| DeviceError::rejected(object_type, op, format!("object [{}] does not exist", key)))?;
    let mut added = 0u64;
    for (name, value) in fields_of(payload) {
        let Json::Array(items) = value else {
            return Err(DeviceError::Rejected {
                object_type: object_type.to_string(),
                operation: op,
                message: format!("field `{}` is not a list", name),
                field: Some(name),
            });
        };
        added += items.len() as u64;
        match obj.entry(name).or_insert_with(|| Json::Array(Vec::new())) {
            // Duplicates are accepted as-is.
            Json::Array(existing) => existing.extend(items),
            other => *other = Json::Array(items),
        }
    }
    Ok(RawResult::new(json!({ "added": added })))
}

fn management(st: &mut DeviceState, object_type: &str, payload: &Json) -> Result<RawResult, DeviceError> {
    let op = OperationKind::Management;
    let operation = payload
        .get("operation")
        .and_then(Json::as_str)
        .ok_or_else(|| DeviceError::rejected(object_type, op, "management request names no operation"))?
        .to_string();
    let args = payload.get("args").cloned().unwrap_or(Json::Null);
    let arg_str = |name: &str| args.get(name).and_then(Json::as_str).map(str::to_string);
    let reply = match operation.as_str() {
        "reboot" | "reboot_stateful" => {
            // Unsaved configuration does not survive a reboot.
            st.running = st.flash.clone();
            st.candidate = st.flash.clone();
            json!({ "rebooted": true })
        }
        "set_ha_backup" => {
            st.ha_role = Some("backup".into());
            json!({ "ha_role": "backup" })
        }
        "software_install" => {
            let version = arg_str("version").ok_or_else(|| DeviceError::rejected(object_type, op, "software_install needs a version"))?;
            // State code 2 is "activated".
            let activated = args.get("state").and_then(Json::as_i64) == Some(2);
            if activated {
                st.software_version = Some(version.clone());
            }
            json!({ "version": version, "activated": activated })
        }
        "config_download" => {
            let path = arg_str("path").ok_or_else(|| DeviceError::rejected(object_type, op, "config_download needs a path"))?;
            let text = serde_json::to_string_pretty(&st.running).map_err(|e| DeviceError::Unreachable(e.to_string()))?;
            std::fs::write(&path, text).map_err(|e| DeviceError::rejected(object_type, op, format!("{}: {}", path, e)))?;
            json!({ "path": path })
        }
        "config_upload" => {
            let path = arg_str("path").ok_or_else(|| DeviceError::rejected(object_type, op, "config_upload needs a path"))?;
            let text = std::fs::read_to_string(&path).map_err(|e| DeviceError::rejected(object_type, op, format!("{}: {}", path, e)))?;
            st.candidate = serde_json::from_str(&text).map_err(|e| DeviceError::rejected(object_type, op, format!("{}: {}", path, e)))?;
            json!({ "path": path, "pending_apply": st.pending_apply() })
        }
        other => return Err(DeviceError::rejected(object_type, op, format!("unknown management operation `{}`", other))),
    };
    st.management_log.push(ManagementRecord { operation, args });
    Ok(RawResult::new(reply))
}
