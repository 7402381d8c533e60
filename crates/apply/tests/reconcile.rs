#![forbid(unsafe_code)]

use lbkit_apply::{ChangeKind, DesiredState, DeviceConfigurator, Options, ReconciliationEngine, Verb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lbkit_core::{ConnectionConfig, DeviceError, DeviceSession, Error, FieldMap, Json, ObjectKey, OperationKind, RawResult, Transport};
use lbkit_sim::MemoryDevice;
use serde_json::json;

fn map(v: Json) -> FieldMap { v.as_object().cloned().unwrap() }

fn key(index: &str) -> ObjectKey { ObjectKey::new(map(json!({ "index": index }))) }

fn setup() -> (DeviceSession, MemoryDevice) {
    let dev = MemoryDevice::new();
    let s = DeviceSession::connect(ConnectionConfig::new("mem://", "admin", "admin"), &dev).unwrap();
    dev.reset_calls();
    (s, dev)
}

fn desired(index: &str, fields: Json, verb: Verb) -> DesiredState {
    DesiredState::new("server", key(index), map(fields), verb)
}

fn server() -> DeviceConfigurator { DeviceConfigurator::builtin("server").unwrap() }

/// Forwards to a `MemoryDevice` but fails the n-th read.
struct FailingRead {
    dev: MemoryDevice,
    reads: Arc<AtomicUsize>,
    fail_at: usize,
}

impl Transport for FailingRead {
    fn invoke(&mut self, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError> {
        if op == OperationKind::Read && self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(DeviceError::rejected(object_type, op, "link down"));
        }
        self.dev.invoke(object_type, op, payload)
    }
}

fn failing_read_session(dev: &MemoryDevice, fail_at: usize) -> DeviceSession {
    let transport = FailingRead { dev: dev.clone(), reads: Arc::new(AtomicUsize::new(0)), fail_at };
    DeviceSession::new(ConnectionConfig::new("mem://", "admin", "admin"), Box::new(transport))
}

const WRITE_ON_CHANGE: Options = Options { revert_on_error: false, write_on_change: true };
const REVERT: Options = Options { revert_on_error: true, write_on_change: false };

#[test]
fn present_is_idempotent() {
    let (mut s, dev) = setup();
    let cfg = server();
    let want = desired("r1", json!({"ip_address": "10.0.0.1", "weight": 4}), Verb::Present).with_options(WRITE_ON_CHANGE);
    let mut engine = ReconciliationEngine::new(&mut s);
    let first = engine.reconcile(&cfg, &want).unwrap();
    assert!(first.changed);
    assert!(first.diff.iter().all(|c| c.kind == ChangeKind::Added));
    assert_eq!(first.object.as_ref().unwrap()["weight"], json!(4));

    dev.reset_calls();
    let second = engine.reconcile(&cfg, &want).unwrap();
    assert!(!second.changed);
    assert!(second.diff.is_empty());
    // Only the read: write_on_change skips the no-op update.
    assert_eq!(dev.calls(), vec![("server".to_string(), OperationKind::Read)]);
}

#[test]
fn unchanged_present_reissues_update_by_default() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"weight": 4})));
    let want = desired("r1", json!({"weight": 4}), Verb::Present);
    let r = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap();
    assert!(!r.changed);
    assert_eq!(dev.count(OperationKind::Update), 1);
}

#[test]
fn present_sends_only_the_delta() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"weight": 4, "name": "web"})));
    let want = desired("r1", json!({"weight": 9, "name": "web", "state": "enabled"}), Verb::Present);
    let r = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap();
    assert!(r.changed);
    assert_eq!(r.status, "server [index=r1] updated (state, weight)");
    let names: Vec<&str> = r.diff.iter().map(|c| c.field.as_str()).collect();
    assert_eq!(names, vec!["state", "weight"]);
    assert_eq!(dev.object("server", &key("r1")).unwrap()["state"], json!(2));
}

#[test]
fn overwrite_always_recreates() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"weight": 4, "name": "web"})));
    let want = desired("r1", json!({"weight": 4}), Verb::Overwrite);
    let r = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap();
    assert!(r.changed);
    assert_eq!(dev.count(OperationKind::Delete), 1);
    assert_eq!(dev.count(OperationKind::Create), 1);
    let obj = dev.object("server", &key("r1")).unwrap();
    assert!(obj.get("name").is_none(), "fields not supplied are gone");
    assert!(r.diff.iter().any(|c| c.field == "name" && c.kind == ChangeKind::Removed));
}

#[test]
fn overwrite_with_identical_fields_still_changes() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"weight": 4, "name": "web"})));
    let want = desired("r1", json!({"weight": 4, "name": "web"}), Verb::Overwrite).with_options(WRITE_ON_CHANGE);
    let mut engine = ReconciliationEngine::new(&mut s);
    assert!(engine.reconcile(&cfg, &want).unwrap().changed);
    assert!(engine.reconcile(&cfg, &want).unwrap().changed);
    assert_eq!(dev.count(OperationKind::Delete), 2);
    assert_eq!(dev.count(OperationKind::Create), 2);
    assert_eq!(dev.object("server", &key("r1")).unwrap()["name"], json!("web"));
}

#[test]
fn absent_is_idempotent() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), FieldMap::new());
    let want = desired("r1", json!({}), Verb::Absent);
    let mut engine = ReconciliationEngine::new(&mut s);
    assert!(engine.reconcile(&cfg, &want).unwrap().changed);
    let again = engine.reconcile(&cfg, &want).unwrap();
    assert!(!again.changed);
    assert!(again.object.is_none());
    assert_eq!(dev.count(OperationKind::Delete), 1);
}

#[test]
fn read_never_mutates() {
    let (mut s, dev) = setup();
    let cfg = server();
    let r = ReconciliationEngine::new(&mut s).reconcile(&cfg, &desired("r1", json!({}), Verb::Read)).unwrap();
    assert!(!r.changed);
    assert!(r.object.is_none());
    assert!(s.transaction().is_clean());
    assert_eq!(dev.calls().len(), 1);
}

#[test]
fn read_ignores_undeclared_fields() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"weight": 4})));
    let want = desired("r1", json!({"colour": "red", "weight": "heavy"}), Verb::Read);
    let r = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap();
    assert!(!r.changed);
    assert_eq!(r.object.unwrap()["weight"], json!(4));
}

#[test]
fn invalid_fields_make_no_device_calls() {
    let (mut s, dev) = setup();
    let cfg = server();
    let mut engine = ReconciliationEngine::new(&mut s);
    for want in [
        desired("r1", json!({"weight": "heavy"}), Verb::Present).with_options(REVERT),
        desired("r1", json!({"colour": "red"}), Verb::Overwrite),
        desired("r1", json!({"state": "sleeping"}), Verb::Present),
        desired("r1", json!({"weight": 3}), Verb::Append),
    ] {
        let err = engine.reconcile(&cfg, &want).unwrap_err();
        assert_eq!(err.kind(), "validation_error", "{}", err);
    }
    assert!(dev.calls().is_empty());
    assert!(s.transaction().is_clean());
}

#[test]
fn failure_reverts_once_with_flag() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.reject_field("server", "weight");
    let want = desired("r1", json!({"name": "web", "weight": 3}), Verb::Present).with_options(REVERT);
    let err = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap_err();
    match &err {
        Error::Reconciliation(e) => {
            assert!(e.partial_risk);
            assert!(e.revert_failure.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(err.to_string().contains("inspect with read or diff"));
    assert_eq!(dev.count(OperationKind::Revert), 1);
    // The revert threw away the half-created object.
    assert!(dev.object("server", &key("r1")).is_none());
    assert!(!s.transaction().pending_apply);
}

#[test]
fn failure_without_flag_never_reverts() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.reject_field("server", "weight");
    let want = desired("r1", json!({"name": "web", "weight": 3}), Verb::Present);
    assert!(ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).is_err());
    assert_eq!(dev.count(OperationKind::Revert), 0);
    // Partial application stays visible.
    assert_eq!(dev.object("server", &key("r1")).unwrap()["name"], json!("web"));
    assert!(s.transaction().pending_apply);
}

#[test]
fn failed_revert_is_attached_not_raised() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.reject_field("server", "weight");
    dev.fail_on(OperationKind::Revert, "revert lock held");
    let want = desired("r1", json!({"weight": 3}), Verb::Present).with_options(REVERT);
    let err = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap_err();
    assert_eq!(err.kind(), "reconciliation_error");
    let report = err.report();
    assert!(report.secondary.unwrap().contains("revert lock held"));
}

#[test]
fn append_is_never_diffed() {
    let (mut s, dev) = setup();
    let cfg = server();
    dev.seed("server", &key("r1"), map(json!({"server_ports": [80]})));
    let want = desired("r1", json!({"server_ports": [80]}), Verb::Append).with_options(WRITE_ON_CHANGE);
    let mut engine = ReconciliationEngine::new(&mut s);
    let r = engine.reconcile(&cfg, &want).unwrap();
    assert!(r.changed);
    assert!(r.diff.is_empty());
    assert!(engine.reconcile(&cfg, &want).unwrap().changed);
    assert_eq!(dev.count(OperationKind::Append), 2);
    assert_eq!(dev.object("server", &key("r1")).unwrap()["server_ports"], json!([80, 80, 80]));
}

#[test]
fn append_on_type_without_lists_is_unsupported() {
    let (mut s, dev) = setup();
    let cfg = DeviceConfigurator::builtin("ssl_key").unwrap();
    let want = DesiredState::new("ssl_key", key("k1"), FieldMap::new(), Verb::Append);
    let err = ReconciliationEngine::new(&mut s).reconcile(&cfg, &want).unwrap_err();
    assert_eq!(err.kind(), "unsupported_operation");
    assert!(dev.calls().is_empty());
}

#[test]
fn secrets_always_count_as_change_and_stay_hidden() {
    let (mut s, _dev) = setup();
    let cfg = DeviceConfigurator::builtin("ssl_key").unwrap();
    let want = DesiredState::new("ssl_key", key("k1"), map(json!({"passphrase": "s3cret", "description": "edge"})), Verb::Present)
        .with_options(WRITE_ON_CHANGE);
    let mut engine = ReconciliationEngine::new(&mut s);
    assert!(engine.reconcile(&cfg, &want).unwrap().changed);
    let again = engine.reconcile(&cfg, &want).unwrap();
    assert!(again.changed);
    let rendered = serde_json::to_string(&again).unwrap();
    assert!(!rendered.contains("s3cret"));
    assert_eq!(again.diff.len(), 1);
    assert_eq!(again.diff[0].field, "passphrase");
}

#[test]
fn failed_read_back_keeps_the_update() {
    let dev = MemoryDevice::new();
    dev.seed("server", &key("r1"), map(json!({"weight": 1})));
    let mut s = failing_read_session(&dev, 2);
    let want = desired("r1", json!({"weight": 2}), Verb::Present).with_options(REVERT);
    let r = ReconciliationEngine::new(&mut s).reconcile(&server(), &want).unwrap();
    assert!(r.changed);
    assert_eq!(r.object.unwrap()["weight"], json!(2));
    assert_eq!(dev.count(OperationKind::Update), 1);
    assert_eq!(dev.count(OperationKind::Revert), 0);
    assert_eq!(dev.object("server", &key("r1")).unwrap()["weight"], json!(2));
    assert!(s.transaction().pending_apply);
}

#[test]
fn failed_read_back_after_create_reports_sent_fields() {
    let dev = MemoryDevice::new();
    let mut s = failing_read_session(&dev, 2);
    let want = desired("r1", json!({"weight": 5}), Verb::Present).with_options(REVERT);
    let r = ReconciliationEngine::new(&mut s).reconcile(&server(), &want).unwrap();
    assert!(r.changed);
    let obj = r.object.unwrap();
    assert_eq!(obj["index"], json!("r1"));
    assert_eq!(obj["weight"], json!(5));
    assert!(dev.object("server", &key("r1")).is_some());
}

#[test]
fn failed_read_before_write_is_a_reconciliation_error() {
    let (mut s, dev) = setup();
    dev.fail_on(OperationKind::Read, "link down");
    let want = desired("r1", json!({"weight": 2}), Verb::Present);
    let err = ReconciliationEngine::new(&mut s).reconcile(&server(), &want).unwrap_err();
    assert_eq!(err.kind(), "reconciliation_error");
    match &err {
        Error::Reconciliation(e) => {
            assert_eq!(e.operation, OperationKind::Read);
            assert!(!e.partial_risk);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(dev.count(OperationKind::Update), 0);
    assert_eq!(dev.count(OperationKind::Create), 0);
}
