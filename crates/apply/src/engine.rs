//! Verb-driven reconciliation of one object against the device.

use std::time::Instant;

use lbkit_core::{DeviceSession, Error, FieldMap, Json, ObjectKey, OperationKind, ReconciliationError};
use lbkit_ops::TransactionManager;
use lbkit_schema::{prune_nulls, Mode};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::configurator::{check_append, check_fields, Configurator};
use crate::diff::{describe, field_delta, removal, FieldChange};
use crate::document::{DesiredState, Verb};

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationResult {
    pub changed: bool,
    pub status: String,
    /// Remote state after the call, redacted. `None` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Json>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<FieldChange>,
}

/// Drives configurators through one session.
pub struct ReconciliationEngine<'s> {
    session: &'s mut DeviceSession,
}

impl<'s> ReconciliationEngine<'s> {
    pub fn new(session: &'s mut DeviceSession) -> Self { Self { session } }

    pub fn session(&mut self) -> &mut DeviceSession { &mut *self.session }

    pub fn reconcile(&mut self, configurator: &dyn Configurator, desired: &DesiredState) -> Result<ReconciliationResult, Error> {
        let run = Uuid::new_v4();
        let span = info_span!("reconcile", run = %run, object_type = configurator.object_type(), key = %desired.key, verb = %desired.verb);
        let _g = span.enter();
        let t0 = Instant::now();
        counter!("reconcile_attempts", 1u64, "verb" => desired.verb.as_str());

        let fields = prune_nulls(&desired.fields);
        let res = precheck(configurator, desired, &fields).and_then(|_| {
            if desired.options.revert_on_error && desired.verb.is_mutating() {
                TransactionManager::with_revert_guard(self.session, |s| run_verb(s, configurator, desired, &fields))
            } else {
                run_verb(self.session, configurator, desired, &fields)
            }
        });

        histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(r) => {
                if r.changed {
                    counter!("reconcile_changed", 1u64, "verb" => desired.verb.as_str());
                }
                info!(changed = r.changed, txn = ?self.session.transaction().state(), "{}", r.status);
            }
            Err(e) => {
                counter!("reconcile_err", 1u64, "kind" => e.kind());
                warn!(error = %e, "reconciliation failed");
            }
        }
        res
    }
}

/// Input checks that must pass before any device call.
fn precheck(configurator: &dyn Configurator, desired: &DesiredState, fields: &FieldMap) -> Result<(), Error> {
    let schema = configurator.schema();
    if desired.verb == Verb::Read {
        schema.validate_key(&desired.key)?;
        return Ok(());
    }
    if desired.verb == Verb::Append {
        check_append(schema, fields)?;
    }
    // Overwrite deletes before it creates, so the create has to be known-good first.
    let mode = if desired.verb == Verb::Overwrite { Mode::Full } else { Mode::Partial };
    check_fields(schema, &desired.key, fields, mode)?;
    Ok(())
}

fn run_verb(
    session: &mut DeviceSession,
    cfg: &dyn Configurator,
    desired: &DesiredState,
    fields: &FieldMap,
) -> Result<ReconciliationResult, Error> {
    let schema = cfg.schema();
    let key = &desired.key;
    let label = format!("{} [{}]", cfg.object_type(), key);

    match desired.verb {
        Verb::Read => {
            let current = cfg.read(session, key)?;
            let status = if current.is_some() { format!("{} read", label) } else { format!("{} does not exist", label) };
            Ok(result(false, status, current.as_ref(), Vec::new(), schema))
        }
        Verb::Absent => match read_current(session, cfg, key)? {
            None => Ok(result(false, format!("{} already absent", label), None, Vec::new(), schema)),
            Some(current) => {
                cfg.delete(session, key)?;
                Ok(result(true, format!("{} deleted", label), None, removal(schema, &current), schema))
            }
        },
        Verb::Present => match read_current(session, cfg, key)? {
            None => create(session, cfg, desired, fields, &label),
            Some(current) => {
                let delta = field_delta(schema, fields, &current);
                if delta.is_empty() {
                    if !desired.options.write_on_change {
                        cfg.update(session, key, fields)?;
                    }
                    return Ok(result(false, format!("{} already in desired state", label), Some(&current), Vec::new(), schema));
                }
                cfg.update(session, key, &delta)?;
                let changes = describe(schema, Some(&current), &delta, false);
                let mut expected = current;
                expected.extend(delta.clone());
                let after = read_back(session, cfg, key, Some(expected));
                let names: Vec<&str> = delta.keys().map(String::as_str).collect();
                Ok(result(true, format!("{} updated ({})", label, names.join(", ")), after.as_ref(), changes, schema))
            }
        },
        Verb::Overwrite => match read_current(session, cfg, key)? {
            None => create(session, cfg, desired, fields, &label),
            Some(current) => {
                cfg.delete(session, key)?;
                let sent = cfg.create(session, key, fields)?;
                let changes = describe(schema, Some(&current), &sent, true);
                let after = read_back(session, cfg, key, Some(with_key(key, &sent)));
                Ok(result(true, format!("{} overwritten", label), after.as_ref(), changes, schema))
            }
        },
        Verb::Append => {
            let added = cfg.append(session, key, fields)?;
            let after = read_back(session, cfg, key, None);
            let status = if added { format!("{} entries appended", label) } else { format!("{}: nothing appended", label) };
            Ok(result(added, status, after.as_ref(), Vec::new(), schema))
        }
    }
}

fn create(
    session: &mut DeviceSession,
    cfg: &dyn Configurator,
    desired: &DesiredState,
    fields: &FieldMap,
    label: &str,
) -> Result<ReconciliationResult, Error> {
    let schema = cfg.schema();
    let sent = cfg.create(session, &desired.key, fields)?;
    let after = read_back(session, cfg, &desired.key, Some(with_key(&desired.key, &sent)));
    Ok(result(true, format!("{} created", label), after.as_ref(), describe(schema, None, &sent, false), schema))
}

/// Read ahead of a write. Device failures become a `ReconciliationError` on
/// `read`; nothing has been written yet, so there is no partial risk.
fn read_current(session: &mut DeviceSession, cfg: &dyn Configurator, key: &ObjectKey) -> Result<Option<FieldMap>, Error> {
    cfg.read(session, key).map_err(|e| match e {
        Error::Device(source) => ReconciliationError {
            object_type: cfg.object_type().to_string(),
            key: key.to_string(),
            operation: OperationKind::Read,
            source,
            partial_risk: false,
            revert_failure: None,
        }
        .into(),
        other => other,
    })
}

/// Read after a successful write, only to report the object. A failure here
/// must not fail the write, so it falls back to what was sent.
fn read_back(session: &mut DeviceSession, cfg: &dyn Configurator, key: &ObjectKey, expected: Option<FieldMap>) -> Option<FieldMap> {
    match cfg.read(session, key) {
        Ok(after) => after,
        Err(e) => {
            counter!("reconcile_readback_err", 1u64);
            warn!(error = %e, "read after write failed; reporting the fields sent");
            expected
        }
    }
}

fn with_key(key: &ObjectKey, sent: &FieldMap) -> FieldMap {
    let mut obj = key.fields().clone();
    obj.extend(sent.clone());
    obj
}

fn result(
    changed: bool,
    status: String,
    object: Option<&FieldMap>,
    diff: Vec<FieldChange>,
    schema: &lbkit_schema::Schema,
) -> ReconciliationResult {
    ReconciliationResult { changed, status, object: object.map(|o| Json::Object(schema.redact(o))), diff }
}
