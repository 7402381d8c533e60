#![forbid(unsafe_code)]

use lbkit_api::{Api, TxnCommand};
use lbkit_core::{ConnectionConfig, FieldMap, Json, ObjectKey, OperationKind};
use lbkit_hub::HubConnector;
use lbkit_sim::MemoryDevice;
use serde_json::json;

fn map(v: Json) -> FieldMap { v.as_object().cloned().unwrap() }

fn api(dev: &MemoryDevice) -> Api {
    Api::connect_with(ConnectionConfig::new("mem://", "admin", "admin"), &HubConnector::with_memory(dev.clone())).unwrap()
}

const SERVERS: &str = r#"
object: server
state: present
write_on_change: true
parameters:
  index: web1
  ip_address: 10.0.0.11
  state: enabled
---
object: ssl_key
parameters:
  index: edge
  passphrase: hunter2
"#;

#[test]
fn apply_stream_then_commit_save() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    let run = api.reconcile_text(SERVERS).unwrap();
    assert!(run.is_ok());
    assert_eq!(run.results.len(), 2);
    assert!(run.results.iter().all(|o| o.changed));
    let last = run.results.last().unwrap();
    assert!(last.pending.unwrap().pending_apply);
    let rendered = serde_json::to_string(&run).unwrap();
    assert!(!rendered.contains("hunter2"));

    let diff = api.config(TxnCommand::Diff).unwrap();
    assert_eq!(diff.diff, Some(json!(["+ server[index=web1]", "+ ssl_key[index=edge]"])));

    let saved = api.config(TxnCommand::CommitSave).unwrap();
    assert!(saved.changed);
    assert!(saved.pending.is_none());
    assert!(api.transaction().is_clean());
    assert!(dev.state().flash.contains_key("server"));

    // Same stream again: the server is unchanged, the key's secret always counts.
    let again = api.reconcile_text(SERVERS).unwrap();
    assert!(!again.results[0].changed);
    assert!(again.results[1].changed);
}

#[test]
fn failing_document_stops_the_run() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    let text = "object: server\nparameters: {index: a}\n---\nobject: pool\nparameters: {index: p}\n---\nobject: server\nparameters: {index: b}\n";
    let run = api.reconcile_text(text).unwrap();
    assert_eq!(run.results.len(), 1);
    let err = run.error.unwrap();
    assert_eq!(err.kind, "unsupported_operation");
    assert!(err.message.contains("pool"));
    assert!(dev.object("server", &ObjectKey::new(map(json!({"index": "b"})))).is_none());
}

#[test]
fn malformed_stream_is_rejected_up_front() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    let err = api.reconcile_text("object: server\nstate: sideways\n").unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert_eq!(dev.count(OperationKind::Read), 0);
}

#[test]
fn management_goes_through_declared_arguments() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    let out = api
        .manage("device", "software_install", &map(json!({"version": "34.1", "state": "activated"})))
        .unwrap();
    assert!(out.changed);
    assert_eq!(out.object.unwrap()["activated"], json!(true));
    assert_eq!(dev.state().software_version.as_deref(), Some("34.1"));

    let err = api.manage("device", "software_install", &FieldMap::new()).unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    let err = api.manage("device", "factory_reset", &FieldMap::new()).unwrap_err();
    assert_eq!(err.kind(), "unknown_operation");
    assert!(err.to_string().contains("reboot_stateful"));
    let err = api.manage("license", "show", &FieldMap::new()).unwrap_err();
    assert_eq!(err.kind(), "unsupported_operation");
}

#[test]
fn reboot_guard_uses_session_flags() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    api.reconcile_text("object: server\nparameters: {index: r1}\n").unwrap();
    let err = api.manage("device", "reboot_stateful", &map(json!({"fail_on_pending_cfg": "yes"}))).unwrap_err();
    let report = err.report();
    assert_eq!(report.kind, "management_error");
    assert!(report.message.contains("pending"));

    let out = api.manage("config", "revert", &FieldMap::new()).unwrap();
    assert!(out.changed);
    assert!(out.pending.is_none());
    api.manage("device", "reboot_stateful", &map(json!({"fail_on_pending_cfg": true}))).unwrap();
}

#[test]
fn sim_file_sessions_pick_up_pending_state() {
    let path = std::env::temp_dir().join(format!("lbkit-api-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let endpoint = format!("sim://{}", path.display());

    let mut first = Api::connect(ConnectionConfig::new(endpoint.as_str(), "admin", "admin")).unwrap();
    first.reconcile_text("object: l3_interface\nparameters: {index: 3, ip4_address: 192.0.2.1}\n").unwrap();
    drop(first);

    let mut second = Api::connect(ConnectionConfig::new(endpoint.as_str(), "admin", "admin")).unwrap();
    assert!(second.transaction().pending_apply);
    let read = second.reconcile_text("object: l3_interface\nstate: read\nparameters: {index: 3}\n").unwrap();
    assert_eq!(read.results[0].object.as_ref().unwrap()["ip4_address"], json!("192.0.2.1"));
    assert_eq!(read.results[0].object.as_ref().unwrap()["state"], json!("enabled"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn catalog_and_operations_are_listed() {
    let types = Api::object_types().unwrap();
    let names: Vec<&str> = types.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"server") && names.contains(&"l7_content_class"));
    assert!(Api::schema("server").unwrap().is_identity("index"));
    assert_eq!(Api::schema("pool").unwrap_err().kind(), "unsupported_operation");

    let api = api(&MemoryDevice::new());
    let ops = api.operations();
    assert_eq!(ops.iter().filter(|o| o.capability == "config").count(), TxnCommand::ALL.len());
    let install = ops.iter().find(|o| o.operation == "software_install").unwrap();
    assert_eq!(install.arguments, vec!["version", "[state]", "[reboot_timeout]"]);
}

#[test]
fn config_diff_through_manage_fills_the_diff_slot() {
    let dev = MemoryDevice::new();
    let mut api = api(&dev);
    api.reconcile_text("object: server\nparameters: {index: web1}\n").unwrap();
    let out = api.manage("config", "diff", &FieldMap::new()).unwrap();
    assert_eq!(out.diff, Some(json!(["+ server[index=web1]"])));
    assert!(out.object.as_ref().unwrap().get("diff").is_none());
    assert_eq!(out.diff, api.config(TxnCommand::Diff).unwrap().diff);
}
