//! lbkit hub: endpoint resolution, session setup and the object catalog.

#![forbid(unsafe_code)]

use lbkit_core::{ConnectionConfig, Connector, DeviceError, DeviceSession, Error, Transport};
use lbkit_sim::MemoryDevice;
use metrics::counter;
use tracing::{debug, info};

pub mod catalog;

pub use catalog::{descriptor, object_types, preload, schema, CatalogEntry};

/// Transport chosen by an endpoint's scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `sim://<path>`: simulated device persisted in a JSON file.
    SimFile(String),
    /// `mem://`: throwaway simulated device.
    Memory,
}

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, DeviceError> {
        if let Some(path) = endpoint.strip_prefix("sim://") {
            if path.is_empty() {
                return Err(DeviceError::Unreachable("sim:// endpoint needs a state file path".into()));
            }
            Ok(Self::SimFile(path.to_string()))
        } else if endpoint.starts_with("mem://") {
            Ok(Self::Memory)
        } else {
            Err(DeviceError::Unreachable(format!("no transport for endpoint `{}` (use sim://<path> or mem://)", endpoint)))
        }
    }
}

/// Default connector: resolves endpoints to simulated devices.
#[derive(Debug, Clone, Default)]
pub struct HubConnector {
    memory: Option<MemoryDevice>,
}

impl HubConnector {
    pub fn new() -> Self { Self::default() }

    /// Route `mem://` endpoints to an existing device instead of a fresh one.
    pub fn with_memory(device: MemoryDevice) -> Self { Self { memory: Some(device) } }
}

impl Connector for HubConnector {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Transport>, DeviceError> {
        let endpoint = Endpoint::parse(config.endpoint())?;
        debug!(endpoint = ?endpoint, user = config.user(), "resolving transport");
        match endpoint {
            Endpoint::SimFile(path) => Ok(Box::new(MemoryDevice::open(path)?)),
            Endpoint::Memory => Ok(Box::new(self.memory.clone().unwrap_or_default())),
        }
    }
}

/// Open a session for `config` through the default connector.
pub fn connect(config: ConnectionConfig) -> Result<DeviceSession, Error> { connect_with(config, &HubConnector::new()) }

pub fn connect_with(config: ConnectionConfig, connector: &dyn Connector) -> Result<DeviceSession, Error> {
    counter!("session_connect_attempts", 1u64);
    let session = DeviceSession::connect(config, connector).map_err(|e| {
        counter!("session_connect_err", 1u64);
        e
    })?;
    info!(session = %session.id(), txn = ?session.transaction().state(), "session ready");
    Ok(session)
}
