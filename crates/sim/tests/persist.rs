#![forbid(unsafe_code)]

use lbkit_core::{Json, ObjectKey, OperationKind, Transport};
use lbkit_sim::MemoryDevice;
use serde_json::json;

fn state_file(name: &str) -> std::path::PathBuf {
    let p = std::env::temp_dir().join(format!("lbkit-sim-{}-{}.json", name, std::process::id()));
    let _ = std::fs::remove_file(&p);
    p
}

#[test]
fn state_survives_reopen() {
    let path = state_file("reopen");
    let mut dev = MemoryDevice::open(&path).unwrap();
    dev.invoke("server", OperationKind::Create, &json!({"key": {"index": "r1"}, "fields": {"weight": 3}})).unwrap();
    dev.invoke("config", OperationKind::Apply, &Json::Null).unwrap();
    drop(dev);

    let mut again = MemoryDevice::open(&path).unwrap();
    let key = ObjectKey::new(json!({"index": "r1"}).as_object().cloned().unwrap());
    assert_eq!(again.object("server", &key).unwrap()["weight"], json!(3));
    let pending = again.invoke("config", OperationKind::PendingState, &Json::Null).unwrap();
    assert_eq!(pending.flag("pending_apply"), Some(false));
    assert_eq!(pending.flag("pending_save"), Some(true));
    assert!(again.calls().len() == 1, "call log is not persisted");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn partial_write_is_persisted() {
    let path = state_file("partial");
    let mut dev = MemoryDevice::open(&path).unwrap();
    dev.reject_field("server", "weight");
    assert!(dev
        .invoke("server", OperationKind::Create, &json!({"key": {"index": "r2"}, "fields": {"ip_address": "10.1.1.1", "weight": 3}}))
        .is_err());
    drop(dev);

    let again = MemoryDevice::open(&path).unwrap();
    let key = ObjectKey::new(json!({"index": "r2"}).as_object().cloned().unwrap());
    let obj = again.object("server", &key).unwrap();
    assert_eq!(obj["ip_address"], json!("10.1.1.1"));
    assert!(obj.get("weight").is_none());
    let _ = std::fs::remove_file(&path);
}
