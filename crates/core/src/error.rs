use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::OperationKind;

/// Failure reported by the transport or the device itself.
///
/// Messages name fields, never their values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device rejected {operation} on {object_type}: {message}")]
    Rejected {
        object_type: String,
        operation: OperationKind,
        message: String,
        field: Option<String>,
    },
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device call timed out after {0}s")]
    Timeout(u64),
    #[error("operation `{0}` is not supported by this transport")]
    Unsupported(OperationKind),
}

impl DeviceError {
    pub fn rejected(object_type: impl Into<String>, operation: OperationKind, message: impl Into<String>) -> Self {
        Self::Rejected { object_type: object_type.into(), operation, message: message.into(), field: None }
    }

    /// Field the device stopped at, when it says so.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Rejected { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

/// Malformed object-type definition. Raised while building a schema, never per request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{type_name}.{field}: enumeration fields cannot be repeated")]
    RepeatedEnum { type_name: String, field: String },
    #[error("{type_name}.{field}: unsupported declared type `{declared}`")]
    UnsupportedType { type_name: String, field: String, declared: String },
    #[error("{type_name}.{field}: declared more than once")]
    DuplicateField { type_name: String, field: String },
    #[error("{type_name}.{field}: identity fields cannot be repeated")]
    RepeatedIdentity { type_name: String, field: String },
}

/// Caller-supplied fields violate the schema. Raised before any device effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("missing required field `{0}`")]
    MissingRequired(String),
    #[error("`{path}`: expected {expected}, got {found}")]
    WrongKind { path: String, expected: &'static str, found: &'static str },
    #[error("`{path}`: value `{value}` is not one of [{}]", .choices.join(", "))]
    NotAChoice { path: String, value: String, choices: Vec<String> },
    #[error("`{path}`: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{operation}` is not supported for `{object_type}`: {reason}")]
pub struct UnsupportedOperation {
    pub object_type: String,
    pub operation: String,
    pub reason: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{operation}` is not an operation of {capability} (available: {})", .available.join(", "))]
pub struct UnknownOperationError {
    pub capability: String,
    pub operation: String,
    pub available: Vec<String>,
}

/// A staged-configuration command (apply, save, revert, ...) failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{command} failed: {source}{}", revert_note(.revert_failure.as_deref()))]
pub struct TransactionError {
    pub command: String,
    pub source: DeviceError,
    pub revert_failure: Option<Box<TransactionError>>,
}

impl TransactionError {
    pub fn new(command: impl Into<String>, source: DeviceError) -> Self {
        Self { command: command.into(), source, revert_failure: None }
    }
}

/// The device rejected a mutating object operation.
///
/// When `partial_risk` is set the device may have applied the fields that
/// precede the rejected one; nothing in the reply says which. Callers have to
/// `read` or `diff` to find out.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error(
    "{operation} {object_type} [{key}] failed: {source}{}{}",
    partial_note(*.partial_risk),
    revert_note(.revert_failure.as_ref())
)]
pub struct ReconciliationError {
    pub object_type: String,
    pub key: String,
    pub operation: OperationKind,
    pub source: DeviceError,
    pub partial_risk: bool,
    pub revert_failure: Option<TransactionError>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{capability}.{operation}: {message}")]
pub struct ManagementError {
    pub capability: String,
    pub operation: String,
    pub message: String,
}

fn partial_note(partial: bool) -> &'static str {
    if partial {
        "; fields preceding the rejected one may already be staged (inspect with read or diff)"
    } else {
        ""
    }
}

fn revert_note(failure: Option<&TransactionError>) -> String {
    match failure {
        Some(f) => format!("; automatic revert also failed: {}", f),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedOperation),
    #[error("unknown operation: {0}")]
    UnknownOperation(#[from] UnknownOperationError),
    #[error("reconciliation: {0}")]
    Reconciliation(#[from] ReconciliationError),
    #[error("transaction: {0}")]
    Transaction(#[from] TransactionError),
    #[error("management: {0}")]
    Management(#[from] ManagementError),
    #[error("device: {0}")]
    Device(#[from] DeviceError),
    #[error("connect: {0}")]
    Connect(String),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema(_) => "schema_error",
            Self::Validation(_) => "validation_error",
            Self::Unsupported(_) => "unsupported_operation",
            Self::UnknownOperation(_) => "unknown_operation",
            Self::Reconciliation(_) => "reconciliation_error",
            Self::Transaction(_) => "transaction_error",
            Self::Management(_) => "management_error",
            Self::Device(_) => "device_error",
            Self::Connect(_) => "connect_error",
        }
    }

    /// Attach a failed automatic revert as secondary error. The primary error
    /// always stays the one returned.
    pub fn with_revert_failure(self, failure: TransactionError) -> Self {
        match self {
            Self::Reconciliation(mut e) => {
                e.revert_failure = Some(failure);
                Self::Reconciliation(e)
            }
            Self::Transaction(mut e) => {
                e.revert_failure = Some(Box::new(failure));
                Self::Transaction(e)
            }
            other => {
                warn!(kind = other.kind(), error = %failure, "revert failed after error with no slot for it");
                other
            }
        }
    }

    pub fn revert_failure(&self) -> Option<&TransactionError> {
        match self {
            Self::Reconciliation(e) => e.revert_failure.as_ref(),
            Self::Transaction(e) => e.revert_failure.as_deref(),
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            secondary: self.revert_failure().map(|f| f.to_string()),
        }
    }
}

/// Structured `{kind, message}` rendering of an [`Error`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}
