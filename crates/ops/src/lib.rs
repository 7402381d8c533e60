//! lbkit ops: imperative device operations.
//!
//! [`TransactionManager`] drives the staged-configuration lifecycle
//! (apply, save, revert, ...). [`ManagementDispatcher`] exposes named
//! operations with declared, coerced arguments on top of a
//! [`ManagementCapability`].

#![forbid(unsafe_code)]

mod capability;
mod dispatch;
mod txn;

pub use capability::{ConfigCapability, DeviceOperations};
pub use dispatch::{CapabilityError, ManagementCapability, ManagementDispatcher, OperationSpec};
pub use txn::{TransactionManager, TxnCommand, TxnReport};
