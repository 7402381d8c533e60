//! Staged-configuration commands and the revert-on-error guard.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use lbkit_core::{DeviceSession, Error, Json, OperationKind, Transaction, TransactionError};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnCommand {
    Apply,
    Commit,
    CommitSave,
    Save,
    Diff,
    DiffFlash,
    PendingConfigurationValidation,
    Revert,
    RevertApply,
    Sync,
}

impl TxnCommand {
    pub const ALL: [TxnCommand; 10] = [
        Self::Apply,
        Self::Commit,
        Self::CommitSave,
        Self::Save,
        Self::Diff,
        Self::DiffFlash,
        Self::PendingConfigurationValidation,
        Self::Revert,
        Self::RevertApply,
        Self::Sync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Commit => "commit",
            Self::CommitSave => "commit_save",
            Self::Save => "save",
            Self::Diff => "diff",
            Self::DiffFlash => "diff_flash",
            Self::PendingConfigurationValidation => "pending_configuration_validation",
            Self::Revert => "revert",
            Self::RevertApply => "revert_apply",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for TxnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for TxnCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s).ok_or_else(|| s.to_string())
    }
}

/// Outcome of one transaction command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxnReport {
    pub command: TxnCommand,
    pub changed: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diff: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Json>,
    pub before: Transaction,
    pub after: Transaction,
}

impl TxnReport {
    fn new(command: TxnCommand, changed: bool, before: Transaction, after: Transaction) -> Self {
        let status = if changed { format!("{} done", command) } else { format!("{}: nothing pending", command) };
        Self { command, changed, status, diff: Vec::new(), detail: None, before, after }
    }
}

/// Drives the device's staged-configuration lifecycle for one session.
///
/// `changed` is derived from the flags observed right before each command,
/// never from the device reply.
pub struct TransactionManager;

impl TransactionManager {
    pub fn execute(session: &mut DeviceSession, command: TxnCommand) -> Result<TxnReport, Error> {
        let t0 = Instant::now();
        counter!("txn_commands", 1u64, "command" => command.as_str());
        let res = match command {
            TxnCommand::Apply => Self::apply(session).map_err(Error::from),
            TxnCommand::Commit => Self::commit(session),
            TxnCommand::CommitSave => Self::commit_save(session),
            TxnCommand::Save => Self::save(session).map_err(Error::from),
            TxnCommand::Diff => Self::diff(session).map_err(Error::from),
            TxnCommand::DiffFlash => Self::diff_flash(session).map_err(Error::from),
            TxnCommand::PendingConfigurationValidation => Self::pending_configuration_validation(session).map_err(Error::from),
            TxnCommand::Revert => Self::revert(session).map_err(Error::from),
            TxnCommand::RevertApply => Self::revert_apply(session).map_err(Error::from),
            TxnCommand::Sync => Self::sync(session).map_err(Error::from),
        };
        histogram!("txn_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(r) => info!(session = %session.id(), command = %command, changed = r.changed, "transaction command"),
            Err(e) => {
                counter!("txn_err", 1u64, "command" => command.as_str());
                warn!(session = %session.id(), command = %command, error = %e, "transaction command failed");
            }
        }
        res
    }

    fn call(session: &mut DeviceSession, command: TxnCommand, op: OperationKind) -> Result<Json, TransactionError> {
        session
            .invoke("config", op, &Json::Null)
            .map(|r| r.body)
            .map_err(|e| TransactionError::new(command.as_str(), e))
    }

    /// Activate staged edits. They then wait to be saved.
    pub fn apply(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let before = session.transaction();
        Self::call(session, TxnCommand::Apply, OperationKind::Apply)?;
        let after = Transaction { pending_apply: false, pending_save: before.pending_save || before.pending_apply };
        session.set_transaction(after);
        Ok(TxnReport::new(TxnCommand::Apply, before.pending_apply, before, after))
    }

    /// Apply; if that fails, discard the staged edits.
    pub fn commit(session: &mut DeviceSession) -> Result<TxnReport, Error> {
        let report = Self::with_revert_guard(session, |s| Self::apply(s).map_err(Error::from))?;
        Ok(TxnReport { command: TxnCommand::Commit, status: report.status.replacen("apply", "commit", 1), ..report })
    }

    /// Commit, then persist the active configuration.
    pub fn commit_save(session: &mut DeviceSession) -> Result<TxnReport, Error> {
        let before = session.transaction();
        Self::commit(session)?;
        Self::save(session)?;
        let after = session.transaction();
        Ok(TxnReport::new(TxnCommand::CommitSave, before.pending_apply || before.pending_save, before, after))
    }

    pub fn save(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let before = session.transaction();
        Self::call(session, TxnCommand::Save, OperationKind::Save)?;
        let after = Transaction { pending_save: false, ..before };
        session.set_transaction(after);
        Ok(TxnReport::new(TxnCommand::Save, before.pending_save, before, after))
    }

    /// Staged edits not yet applied. Empty without asking the device when none are tracked.
    pub fn diff(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        Self::diff_layer(session, TxnCommand::Diff)
    }

    /// Active configuration not yet saved.
    pub fn diff_flash(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        Self::diff_layer(session, TxnCommand::DiffFlash)
    }

    fn diff_layer(session: &mut DeviceSession, command: TxnCommand) -> Result<TxnReport, TransactionError> {
        let txn = session.transaction();
        let (pending, op, label) = match command {
            TxnCommand::DiffFlash => (txn.pending_save, OperationKind::DiffFlash, "no pending save"),
            _ => (txn.pending_apply, OperationKind::Diff, "no pending apply"),
        };
        let mut report = TxnReport::new(command, false, txn, txn);
        if !pending {
            report.status = label.to_string();
            return Ok(report);
        }
        let body = Self::call(session, command, op)?;
        report.diff = lbkit_core::RawResult::new(body).lines();
        report.status = format!("{} change(s)", report.diff.len());
        Ok(report)
    }

    pub fn pending_configuration_validation(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let txn = session.transaction();
        let body = Self::call(session, TxnCommand::PendingConfigurationValidation, OperationKind::ValidatePending)?;
        let mut report = TxnReport::new(TxnCommand::PendingConfigurationValidation, false, txn, txn);
        report.status = "pending configuration validated".into();
        report.detail = Some(body);
        Ok(report)
    }

    /// Discard staged edits that were not applied.
    pub fn revert(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let before = session.transaction();
        Self::call(session, TxnCommand::Revert, OperationKind::Revert)?;
        let after = Transaction { pending_apply: false, ..before };
        session.set_transaction(after);
        Ok(TxnReport::new(TxnCommand::Revert, before.pending_apply, before, after))
    }

    /// Go back to the saved configuration, dropping applied and staged edits.
    pub fn revert_apply(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let before = session.transaction();
        Self::call(session, TxnCommand::RevertApply, OperationKind::RevertApply)?;
        session.set_transaction(Transaction::CLEAN);
        Ok(TxnReport::new(TxnCommand::RevertApply, before.pending_apply || before.pending_save, before, Transaction::CLEAN))
    }

    /// Push configuration to HA peers. Independent of the pending flags.
    pub fn sync(session: &mut DeviceSession) -> Result<TxnReport, TransactionError> {
        let txn = session.transaction();
        let body = Self::call(session, TxnCommand::Sync, OperationKind::Sync)?;
        let mut report = TxnReport::new(TxnCommand::Sync, false, txn, txn);
        report.status = "configuration synced to peers".into();
        report.detail = Some(body);
        Ok(report)
    }

    /// Run `f`; when it fails, issue one best-effort `revert` before
    /// returning the original error. A failing revert is attached to that
    /// error, never returned in its place.
    ///
    /// Errors raised before any device effect (validation and the like)
    /// are returned without reverting.
    pub fn with_revert_guard<T>(
        session: &mut DeviceSession,
        f: impl FnOnce(&mut DeviceSession) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let err = match f(session) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !touched_device(&err) {
            return Err(err);
        }
        counter!("txn_auto_revert", 1u64);
        warn!(session = %session.id(), error = %err, "reverting staged configuration after error");
        match Self::revert(session) {
            Ok(_) => Err(err),
            Err(revert_err) => {
                counter!("txn_auto_revert_err", 1u64);
                warn!(session = %session.id(), error = %revert_err, "automatic revert failed");
                Err(err.with_revert_failure(revert_err))
            }
        }
    }
}

fn touched_device(err: &Error) -> bool {
    !matches!(err, Error::Schema(_) | Error::Validation(_) | Error::Unsupported(_) | Error::UnknownOperation(_))
}
