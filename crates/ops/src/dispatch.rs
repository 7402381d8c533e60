//! Named management operations with declared arguments.

use std::sync::Arc;
use std::time::Instant;

use lbkit_core::{DeviceError, DeviceSession, Error, FieldMap, Json, ManagementError, SchemaError, UnknownOperationError};
use lbkit_schema::{coerce_args, schema_for, ArgMap, Schema, TypeDescriptor};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One operation a capability offers, with its argument declaration.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: &'static str,
    pub summary: &'static str,
    pub args: TypeDescriptor,
}

impl OperationSpec {
    pub fn new(name: &'static str, summary: &'static str, args: TypeDescriptor) -> Self { Self { name, summary, args } }
}

/// Domain failure of a capability. The dispatcher turns every variant into
/// a [`ManagementError`].
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Core(#[from] Error),
    #[error("{0}")]
    Refused(String),
}

/// A group of device operations (`config`, `device`, ...).
pub trait ManagementCapability {
    fn name(&self) -> &'static str;

    /// Fixed at construction; the dispatcher reads it once.
    fn operations(&self) -> Vec<OperationSpec>;

    /// Arguments are already coerced; absent ones are missing from `args`.
    fn call(&self, session: &mut DeviceSession, operation: &str, args: &ArgMap) -> Result<Json, CapabilityError>;
}

/// Routes operation names to a capability after checking their arguments.
pub struct ManagementDispatcher<C> {
    capability: C,
    ops: Vec<(OperationSpec, Arc<Schema>)>,
}

impl<C: ManagementCapability> ManagementDispatcher<C> {
    /// Build every argument schema up front; a malformed declaration fails here.
    pub fn new(capability: C) -> Result<Self, SchemaError> {
        let mut ops = Vec::new();
        for spec in capability.operations() {
            let schema = schema_for(&spec.args)?;
            ops.push((spec, schema));
        }
        debug!(capability = capability.name(), operations = ops.len(), "management dispatcher ready");
        Ok(Self { capability, ops })
    }

    pub fn capability(&self) -> &C { &self.capability }

    pub fn operations(&self) -> Vec<&'static str> { self.ops.iter().map(|(s, _)| s.name).collect() }

    pub fn spec(&self, operation: &str) -> Option<(&OperationSpec, &Schema)> {
        self.ops.iter().find(|(s, _)| s.name == operation).map(|(s, schema)| (s, schema.as_ref()))
    }

    pub fn invoke(&self, session: &mut DeviceSession, operation: &str, supplied: &FieldMap) -> Result<Json, Error> {
        let cap = self.capability.name();
        let (_, schema) = self.spec(operation).ok_or_else(|| UnknownOperationError {
            capability: cap.to_string(),
            operation: operation.to_string(),
            available: self.operations().iter().map(|s| s.to_string()).collect(),
        })?;
        let args = coerce_args(schema, supplied)?;
        for extra in supplied.keys().filter(|k| schema.get(k).is_none()) {
            debug!(capability = cap, operation, argument = extra.as_str(), "ignoring undeclared argument");
        }

        let t0 = Instant::now();
        counter!("mng_invoke_attempts", 1u64, "capability" => cap);
        let res = self.capability.call(session, operation, &args);
        histogram!("mng_invoke_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        match res {
            Ok(v) => {
                counter!("mng_invoke_ok", 1u64, "capability" => cap);
                info!(session = %session.id(), capability = cap, operation, "management operation done");
                Ok(v)
            }
            Err(e) => {
                counter!("mng_invoke_err", 1u64, "capability" => cap);
                warn!(session = %session.id(), capability = cap, operation, error = %e, "management operation failed");
                Err(ManagementError { capability: cap.to_string(), operation: operation.to_string(), message: e.to_string() }.into())
            }
        }
    }
}
