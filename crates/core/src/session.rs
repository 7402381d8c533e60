use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ConnectionConfig, DeviceError, Error, Json, OperationKind, RawResult};

/// Wire-level access to one device. The protocol behind it is opaque to lbkit.
pub trait Transport: Send {
    fn invoke(&mut self, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError>;
}

/// Opens transports for a connection config (endpoint scheme decides which).
pub trait Connector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Transport>, DeviceError>;
}

/// Staged-configuration flags tracked for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub pending_apply: bool,
    pub pending_save: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    Clean,
    Dirty,
    AppliedPending,
}

impl Transaction {
    pub const CLEAN: Transaction = Transaction { pending_apply: false, pending_save: false };

    pub fn state(&self) -> TxnState {
        if self.pending_apply {
            TxnState::Dirty
        } else if self.pending_save {
            TxnState::AppliedPending
        } else {
            TxnState::Clean
        }
    }

    pub fn is_clean(&self) -> bool { !self.pending_apply && !self.pending_save }
}

/// One logical connection to a device plus its transaction flags.
///
/// Not meant to be shared: every operation takes `&mut self`, so callers
/// serialize work against one device through one session.
pub struct DeviceSession {
    id: Uuid,
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    txn: Transaction,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("endpoint", &self.config.endpoint())
            .field("txn", &self.txn)
            .finish()
    }
}

impl DeviceSession {
    /// Wrap an already-open transport. Transaction flags start clean.
    pub fn new(config: ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        Self { id: Uuid::new_v4(), config, transport, txn: Transaction::CLEAN }
    }

    /// Open a transport and seed transaction flags from the device.
    pub fn connect(config: ConnectionConfig, connector: &dyn Connector) -> Result<Self, Error> {
        let transport = connector
            .connect(&config)
            .map_err(|e| Error::Connect(format!("{}: {}", config.endpoint(), e)))?;
        let mut session = Self::new(config, transport);
        session.seed_transaction();
        info!(session = %session.id, endpoint = %session.config.endpoint(), txn = ?session.txn, "device session opened");
        Ok(session)
    }

    fn seed_transaction(&mut self) {
        match self.transport.invoke("config", OperationKind::PendingState, &Json::Null) {
            Ok(r) => {
                self.txn = Transaction {
                    pending_apply: r.flag("pending_apply").unwrap_or(false),
                    pending_save: r.flag("pending_save").unwrap_or(false),
                };
            }
            Err(DeviceError::Unsupported(_)) => debug!("transport cannot report pending state; starting clean"),
            Err(e) => warn!(error = %e, "pending state query failed; starting clean"),
        }
    }

    /// Replace the tracked flags (resuming a known device state).
    pub fn with_transaction(mut self, txn: Transaction) -> Self {
        self.txn = txn;
        self
    }

    pub fn id(&self) -> Uuid { self.id }

    pub fn config(&self) -> &ConnectionConfig { &self.config }

    pub fn transaction(&self) -> Transaction { self.txn }

    pub fn set_transaction(&mut self, txn: Transaction) {
        debug!(session = %self.id, from = ?self.txn, to = ?txn, "transaction flags");
        self.txn = txn;
    }

    /// Forward one call to the device. Object writes mark the transaction
    /// dirty even when they fail, since the device may have applied part of them.
    pub fn invoke(&mut self, object_type: &str, op: OperationKind, payload: &Json) -> Result<RawResult, DeviceError> {
        debug!(session = %self.id, object_type, op = %op, "device call");
        let res = self.transport.invoke(object_type, op, payload);
        if op.is_mutating() {
            self.txn.pending_apply = true;
        }
        if let Err(e) = &res {
            debug!(session = %self.id, object_type, op = %op, error = %e, "device call failed");
        }
        res
    }
}
