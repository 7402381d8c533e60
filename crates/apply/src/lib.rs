//! lbkit apply: bring device objects to a desired state.
//!
//! A [`DesiredState`] names an object, the fields the caller cares about and
//! a [`Verb`]. The [`ReconciliationEngine`] reads the object through its
//! [`Configurator`], computes what differs and issues the minimal writes.

#![forbid(unsafe_code)]

mod configurator;
mod diff;
mod document;
mod engine;

pub use configurator::{check_append, check_fields, Configurator, DeviceConfigurator};
pub use diff::{describe, field_delta, removal, summarize, ChangeKind, DiffSummary, FieldChange};
pub use document::{DesiredState, Document, Options, Verb};
pub use engine::{ReconciliationEngine, ReconciliationResult};
