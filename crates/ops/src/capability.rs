//! Built-in management capabilities.

use lbkit_core::{DeviceSession, Json, OperationKind, Transaction};
use lbkit_schema::{args_payload, Arg, ArgMap, EnumDecl, FieldDecl, TypeDescriptor};
use serde_json::json;
use tracing::info;

use crate::dispatch::{CapabilityError, ManagementCapability, OperationSpec};
use crate::txn::{TransactionManager, TxnCommand};

const DEFAULT_REBOOT_TIMEOUT: i64 = 600;

/// Transaction commands exposed as management operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigCapability;

impl ManagementCapability for ConfigCapability {
    fn name(&self) -> &'static str { "config" }

    fn operations(&self) -> Vec<OperationSpec> {
        TxnCommand::ALL
            .iter()
            .map(|c| {
                let summary = match c {
                    TxnCommand::Apply => "activate staged configuration",
                    TxnCommand::Commit => "apply, reverting on failure",
                    TxnCommand::CommitSave => "commit, then save",
                    TxnCommand::Save => "save active configuration to flash",
                    TxnCommand::Diff => "list staged changes",
                    TxnCommand::DiffFlash => "list active changes not saved",
                    TxnCommand::PendingConfigurationValidation => "validate staged configuration",
                    TxnCommand::Revert => "discard staged changes",
                    TxnCommand::RevertApply => "return to the saved configuration",
                    TxnCommand::Sync => "synchronize configuration to peers",
                };
                OperationSpec::new(c.as_str(), summary, TypeDescriptor::new(arg_type_name(*c)))
            })
            .collect()
    }

    fn call(&self, session: &mut DeviceSession, operation: &str, _args: &ArgMap) -> Result<Json, CapabilityError> {
        let command: TxnCommand = operation.parse().map_err(|op| CapabilityError::Refused(format!("`{}` is not a transaction command", op)))?;
        let report = TransactionManager::execute(session, command)?;
        serde_json::to_value(report).map_err(|e| CapabilityError::Refused(e.to_string()))
    }
}

fn arg_type_name(c: TxnCommand) -> &'static str {
    match c {
        TxnCommand::Apply => "config.apply",
        TxnCommand::Commit => "config.commit",
        TxnCommand::CommitSave => "config.commit_save",
        TxnCommand::Save => "config.save",
        TxnCommand::Diff => "config.diff",
        TxnCommand::DiffFlash => "config.diff_flash",
        TxnCommand::PendingConfigurationValidation => "config.pending_configuration_validation",
        TxnCommand::Revert => "config.revert",
        TxnCommand::RevertApply => "config.revert_apply",
        TxnCommand::Sync => "config.sync",
    }
}

/// Device-level operations: reboots, HA role, software and configuration files.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceOperations;

impl ManagementCapability for DeviceOperations {
    fn name(&self) -> &'static str { "device" }

    fn operations(&self) -> Vec<OperationSpec> {
        vec![
            OperationSpec::new("reboot", "reboot the device", TypeDescriptor::new("device.reboot")),
            OperationSpec::new(
                "reboot_stateful",
                "reboot and wait for the device to come back",
                TypeDescriptor::new("device.reboot_stateful")
                    .field(FieldDecl::int("timeout_seconds").optional())
                    .field(FieldDecl::bool("fail_on_pending_cfg").optional()),
            ),
            OperationSpec::new("set_ha_backup", "move this device to HA backup", TypeDescriptor::new("device.set_ha_backup")),
            OperationSpec::new(
                "software_install",
                "install a software image",
                TypeDescriptor::new("device.software_install")
                    .field(FieldDecl::str("version"))
                    .field(
                        FieldDecl::enumeration("state", EnumDecl::new("software_state", &[("installed", 1), ("activated", 2)])).optional(),
                    )
                    .field(FieldDecl::int("reboot_timeout").optional()),
            ),
            OperationSpec::new(
                "config_download",
                "write the active configuration to a file",
                TypeDescriptor::new("device.config_download").field(FieldDecl::str("path")),
            ),
            OperationSpec::new(
                "config_upload",
                "stage configuration from a file",
                TypeDescriptor::new("device.config_upload").field(FieldDecl::str("path")),
            ),
        ]
    }

    fn call(&self, session: &mut DeviceSession, operation: &str, args: &ArgMap) -> Result<Json, CapabilityError> {
        let mut args = args.clone();
        match operation {
            "reboot_stateful" => {
                let txn = session.transaction();
                if args.get("fail_on_pending_cfg").and_then(Arg::as_bool).unwrap_or(false) && !txn.is_clean() {
                    return Err(CapabilityError::Refused(format!(
                        "configuration changes are pending ({:?}); refusing to reboot",
                        txn.state()
                    )));
                }
                args.entry("timeout_seconds".into()).or_insert(Arg::Int(DEFAULT_REBOOT_TIMEOUT));
            }
            "software_install" => {
                args.entry("reboot_timeout".into()).or_insert(Arg::Int(DEFAULT_REBOOT_TIMEOUT));
            }
            _ => {}
        }
        let payload = json!({ "operation": operation, "args": args_payload(&args) });
        let reply = session.invoke("device", OperationKind::Management, &payload)?;
        match operation {
            // Unsaved configuration is gone after a reboot.
            "reboot" | "reboot_stateful" => session.set_transaction(Transaction::CLEAN),
            "config_upload" => {
                if reply.flag("pending_apply").unwrap_or(false) {
                    session.set_transaction(Transaction { pending_apply: true, ..session.transaction() });
                }
            }
            _ => {}
        }
        info!(session = %session.id(), operation, "device operation issued");
        Ok(reply.body)
    }
}
