#![forbid(unsafe_code)]

use lbkit_core::{ConnectionConfig, DeviceSession, Error, FieldMap, Json, ObjectKey, OperationKind, Transaction};
use lbkit_ops::{ConfigCapability, DeviceOperations, ManagementDispatcher};
use lbkit_sim::MemoryDevice;
use serde_json::json;

fn map(v: Json) -> FieldMap { v.as_object().cloned().unwrap() }

fn session(dev: &MemoryDevice) -> DeviceSession {
    DeviceSession::connect(ConnectionConfig::new("mem://", "admin", "admin"), dev).unwrap()
}

fn stage_server(s: &mut DeviceSession, index: &str) {
    s.invoke("server", OperationKind::Create, &json!({"key": {"index": index}, "fields": {"weight": 2}})).unwrap();
}

#[test]
fn reboot_refuses_with_pending_configuration() {
    let dev = MemoryDevice::new();
    let mut s = session(&dev);
    stage_server(&mut s, "r1");
    let d = ManagementDispatcher::new(DeviceOperations).unwrap();
    let err = d
        .invoke(&mut s, "reboot_stateful", &map(json!({"fail_on_pending_cfg": "true"})))
        .unwrap_err();
    match err {
        Error::Management(e) => assert!(e.message.contains("pending")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(dev.count(OperationKind::Management), 0);

    // Without the check the reboot goes through and staged edits are lost.
    d.invoke(&mut s, "reboot_stateful", &FieldMap::new()).unwrap();
    assert!(s.transaction().is_clean());
    let log = dev.state().management_log;
    assert_eq!(log[0].args["timeout_seconds"], json!(600));
}

#[test]
fn software_install_sends_enum_codes() {
    let dev = MemoryDevice::new();
    let mut s = session(&dev);
    let d = ManagementDispatcher::new(DeviceOperations).unwrap();
    let out = d.invoke(&mut s, "software_install", &map(json!({"version": "34.0.2", "state": "activated"}))).unwrap();
    assert_eq!(out["activated"], json!(true));
    assert_eq!(dev.state().software_version.as_deref(), Some("34.0.2"));
    assert_eq!(dev.state().management_log[0].args["state"], json!(2));
}

#[test]
fn config_capability_runs_transaction_commands() {
    let dev = MemoryDevice::new();
    let mut s = session(&dev);
    stage_server(&mut s, "r1");
    let d = ManagementDispatcher::new(ConfigCapability).unwrap();
    let diff = d.invoke(&mut s, "diff", &FieldMap::new()).unwrap();
    assert_eq!(diff["diff"], json!(["+ server[index=r1]"]));
    let out = d.invoke(&mut s, "commit_save", &FieldMap::new()).unwrap();
    assert_eq!(out["changed"], json!(true));
    assert_eq!(s.transaction(), Transaction::CLEAN);
    let st = dev.state();
    assert!(!st.pending_apply() && !st.pending_save());
    assert!(matches!(d.invoke(&mut s, "rollback", &FieldMap::new()), Err(Error::UnknownOperation(_))));
}

#[test]
fn config_files_round_trip() {
    let path = std::env::temp_dir().join(format!("lbkit-ops-config-{}.json", std::process::id()));
    let path_arg = path.to_string_lossy().to_string();

    let src = MemoryDevice::new();
    let mut s = session(&src);
    stage_server(&mut s, "r9");
    let cfg = ManagementDispatcher::new(ConfigCapability).unwrap();
    cfg.invoke(&mut s, "apply", &FieldMap::new()).unwrap();
    let dev_ops = ManagementDispatcher::new(DeviceOperations).unwrap();
    dev_ops.invoke(&mut s, "config_download", &map(json!({"path": path_arg}))).unwrap();

    let dst = MemoryDevice::new();
    let mut t = session(&dst);
    dev_ops.invoke(&mut t, "config_upload", &map(json!({"path": path_arg}))).unwrap();
    assert!(t.transaction().pending_apply);
    let key = ObjectKey::new(map(json!({"index": "r9"})));
    assert_eq!(dst.object("server", &key).unwrap()["weight"], json!(2));
    let _ = std::fs::remove_file(&path);
}
