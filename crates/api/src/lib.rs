//! lbkit public API façade (in-process).
//!
//! Frontends such as `lbctl` reach a device only through [`Api`]: one
//! session, the reconciliation engine, transaction commands and the
//! management capabilities, with every result in the same [`Outcome`] shape.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use lbkit_apply::{Configurator, DeviceConfigurator, Document, ReconciliationEngine, ReconciliationResult};
use lbkit_core::{
    ConnectionConfig, Connector, DeviceSession, Error, ErrorReport, FieldMap, Json, Transaction, UnsupportedOperation,
};
use lbkit_hub::{CatalogEntry, HubConnector};
use lbkit_ops::{ConfigCapability, DeviceOperations, ManagementDispatcher, TransactionManager, TxnReport};
use lbkit_schema::Schema;
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, warn};

pub use lbkit_apply::{Options, Verb};
pub use lbkit_ops::TxnCommand;

/// Shape of every answer: `{status, changed, object?, diff?, pending?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub status: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Json>,
    /// Transaction flags, present while something is staged or unsaved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<Transaction>,
}

/// Result of applying a document stream. Stops at the first failing document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyRun {
    pub results: Vec<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl ApplyRun {
    pub fn is_ok(&self) -> bool { self.error.is_none() }

    pub fn changed(&self) -> bool { self.results.iter().any(|o| o.changed) }
}

/// One management operation as listed to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    pub capability: &'static str,
    pub operation: &'static str,
    pub summary: &'static str,
    pub arguments: Vec<String>,
}

pub struct Api {
    session: DeviceSession,
    config: ManagementDispatcher<ConfigCapability>,
    device: ManagementDispatcher<DeviceOperations>,
}

impl Api {
    pub fn connect(config: ConnectionConfig) -> Result<Self, Error> { Self::connect_with(config, &HubConnector::new()) }

    pub fn connect_with(config: ConnectionConfig, connector: &dyn Connector) -> Result<Self, Error> {
        lbkit_hub::preload()?;
        Self::from_session(lbkit_hub::connect_with(config, connector)?)
    }

    pub fn from_session(session: DeviceSession) -> Result<Self, Error> {
        Ok(Self {
            session,
            config: ManagementDispatcher::new(ConfigCapability)?,
            device: ManagementDispatcher::new(DeviceOperations)?,
        })
    }

    pub fn session(&self) -> &DeviceSession { &self.session }

    pub fn transaction(&self) -> Transaction { self.session.transaction() }

    /// Built-in object types with their identity fields.
    pub fn object_types() -> Result<Vec<CatalogEntry>, Error> { Ok(lbkit_hub::preload()?) }

    pub fn schema(object: &str) -> Result<Arc<Schema>, Error> { lbkit_hub::schema(object) }

    pub fn reconcile(&mut self, doc: &Document) -> Result<Outcome, Error> {
        counter!("api_calls", 1u64, "call" => "reconcile");
        let cfg = DeviceConfigurator::builtin(&doc.object)?;
        let desired = doc.desired(cfg.schema());
        let r = ReconciliationEngine::new(&mut self.session).reconcile(&cfg, &desired)?;
        Ok(self.reconciled(r))
    }

    /// Parse a YAML/JSON document stream and reconcile each document in order.
    pub fn reconcile_text(&mut self, text: &str) -> Result<ApplyRun, Error> {
        let docs = Document::parse_all(text)?;
        let t0 = Instant::now();
        let mut run = ApplyRun::default();
        for (i, doc) in docs.iter().enumerate() {
            match self.reconcile(doc) {
                Ok(o) => run.results.push(o),
                Err(e) => {
                    warn!(document = i, object = %doc.object, kind = e.kind(), "stopping at failed document");
                    run.error = Some(e.report());
                    break;
                }
            }
        }
        histogram!("api_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(documents = docs.len(), reconciled = run.results.len(), changed = run.changed(), "apply finished");
        Ok(run)
    }

    pub fn config(&mut self, command: TxnCommand) -> Result<Outcome, Error> {
        counter!("api_calls", 1u64, "call" => "config");
        let report = TransactionManager::execute(&mut self.session, command)?;
        Ok(self.reported(report))
    }

    /// Run `operation` of a management capability (`config` or `device`).
    /// Arguments are coerced against the operation's declared types.
    pub fn manage(&mut self, capability: &str, operation: &str, args: &FieldMap) -> Result<Outcome, Error> {
        counter!("api_calls", 1u64, "call" => "manage");
        let reply = match capability {
            "config" => self.config.invoke(&mut self.session, operation, args)?,
            "device" => self.device.invoke(&mut self.session, operation, args)?,
            other => {
                return Err(UnsupportedOperation {
                    object_type: other.to_string(),
                    operation: operation.to_string(),
                    reason: "no such management capability (config, device)".into(),
                }
                .into())
            }
        };
        let mut reply = reply;
        let diff = reply.as_object_mut().and_then(|o| o.remove("diff")).filter(|d| !d.is_null());
        let changed = reply.get("changed").and_then(Json::as_bool).unwrap_or(true);
        let status = reply
            .get("status")
            .and_then(Json::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.{} done", capability, operation));
        Ok(Outcome { status, changed, object: Some(reply), diff, pending: self.pending() })
    }

    pub fn operations(&self) -> Vec<OperationInfo> {
        let mut out = Vec::new();
        for (cap, names) in [("config", self.config.operations()), ("device", self.device.operations())] {
            for name in names {
                let found = if cap == "config" { self.config.spec(name) } else { self.device.spec(name) };
                if let Some((spec, schema)) = found {
                    out.push(OperationInfo {
                        capability: cap,
                        operation: spec.name,
                        summary: spec.summary,
                        arguments: schema.iter().map(|f| if f.required { f.name.clone() } else { format!("[{}]", f.name) }).collect(),
                    });
                }
            }
        }
        out
    }

    fn pending(&self) -> Option<Transaction> {
        let txn = self.session.transaction();
        (!txn.is_clean()).then_some(txn)
    }

    fn reconciled(&self, r: ReconciliationResult) -> Outcome {
        let diff = if r.diff.is_empty() { None } else { serde_json::to_value(&r.diff).ok() };
        Outcome { status: r.status, changed: r.changed, object: r.object, diff, pending: self.pending() }
    }

    fn reported(&self, r: TxnReport) -> Outcome {
        let diff = if r.diff.is_empty() { None } else { Some(Json::from(r.diff)) };
        Outcome { status: r.status, changed: r.changed, object: r.detail, diff, pending: self.pending() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_omits_empty_parts() {
        let o = Outcome { status: "ok".into(), changed: false, object: None, diff: None, pending: None };
        assert_eq!(serde_json::to_value(&o).unwrap(), json!({"status": "ok", "changed": false}));
    }

    #[test]
    fn apply_run_reports_first_error() {
        let run = ApplyRun {
            results: vec![Outcome { status: "a".into(), changed: true, object: None, diff: None, pending: None }],
            error: Some(ErrorReport { kind: "validation_error", message: "bad".into(), secondary: None }),
        };
        assert!(!run.is_ok());
        assert!(run.changed());
        assert_eq!(serde_json::to_value(&run).unwrap()["error"]["kind"], json!("validation_error"));
    }
}
