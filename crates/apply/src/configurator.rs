//! Per-object-type access to the device.

use std::sync::Arc;

use lbkit_core::{
    DeviceError, DeviceSession, Error, FieldMap, Json, ObjectKey, OperationKind, ReconciliationError, UnsupportedOperation,
    ValidationError,
};
use lbkit_schema::{Mode, Schema};
use serde_json::json;
use tracing::debug;

/// Typed read/write operations for one object type.
///
/// Implementations validate before touching the device: a rejected input
/// means no device call was made.
pub trait Configurator {
    fn object_type(&self) -> &str;

    fn schema(&self) -> &Schema;

    /// Current state, `None` when the object does not exist.
    fn read(&self, session: &mut DeviceSession, key: &ObjectKey) -> Result<Option<FieldMap>, Error>;

    /// Create with the given fields; declared defaults fill the omitted ones.
    /// Returns the fields actually sent.
    fn create(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<FieldMap, Error>;

    /// Send only the given fields.
    fn update(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<(), Error>;

    /// True when something was deleted.
    fn delete(&self, session: &mut DeviceSession, key: &ObjectKey) -> Result<bool, Error>;

    /// Add entries to list fields. True when the device reports an addition.
    fn append(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<bool, Error>;
}

/// Checks shared by every write: valid key, known fields, right kinds.
/// Identity fields travel in the key, never among the fields.
pub fn check_fields(schema: &Schema, key: &ObjectKey, fields: &FieldMap, mode: Mode) -> Result<(), ValidationError> {
    schema.validate_key(key)?;
    if let Some(name) = fields.keys().find(|n| schema.is_identity(n)) {
        return Err(ValidationError::Invalid { path: name.clone(), message: "identity fields belong to the object key".into() });
    }
    match mode {
        Mode::Partial => schema.validate(fields, Mode::Partial),
        Mode::Full => {
            let mut all = key.fields().clone();
            all.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            schema.validate(&all, Mode::Full)
        }
    }
}

/// Append may only carry list fields, and the type must have some.
pub fn check_append(schema: &Schema, fields: &FieldMap) -> Result<(), Error> {
    if !schema.has_list_fields() {
        return Err(UnsupportedOperation {
            object_type: schema.type_name.clone(),
            operation: "append".into(),
            reason: "object type has no list fields".into(),
        }
        .into());
    }
    if let Some(name) = fields.keys().find(|n| schema.get(n).map_or(false, |f| !f.is_list())) {
        return Err(ValidationError::Invalid { path: name.clone(), message: "append only accepts list fields".into() }.into());
    }
    Ok(())
}

/// Schema-driven configurator talking to the session's transport.
#[derive(Debug, Clone)]
pub struct DeviceConfigurator {
    schema: Arc<Schema>,
}

impl DeviceConfigurator {
    pub fn new(schema: Arc<Schema>) -> Self { Self { schema } }

    /// Configurator for a type of the built-in catalog.
    pub fn builtin(object_type: &str) -> Result<Self, Error> { Ok(Self::new(lbkit_hub::schema(object_type)?)) }

    fn request(&self, key: &ObjectKey, fields: Option<&FieldMap>) -> Json {
        match fields {
            Some(f) => json!({ "key": key.to_json(), "fields": Json::Object(self.schema.encode(f)) }),
            None => json!({ "key": key.to_json() }),
        }
    }

    fn write(&self, session: &mut DeviceSession, op: OperationKind, key: &ObjectKey, payload: &Json) -> Result<lbkit_core::RawResult, Error> {
        session.invoke(&self.schema.type_name, op, payload).map_err(|source| self.failure(op, key, source))
    }

    fn failure(&self, op: OperationKind, key: &ObjectKey, source: DeviceError) -> Error {
        ReconciliationError {
            object_type: self.schema.type_name.clone(),
            key: key.to_string(),
            operation: op,
            partial_risk: matches!(op, OperationKind::Create | OperationKind::Update | OperationKind::Append),
            source,
            revert_failure: None,
        }
        .into()
    }
}

impl Configurator for DeviceConfigurator {
    fn object_type(&self) -> &str { &self.schema.type_name }

    fn schema(&self) -> &Schema { &self.schema }

    fn read(&self, session: &mut DeviceSession, key: &ObjectKey) -> Result<Option<FieldMap>, Error> {
        self.schema.validate_key(key)?;
        let raw = session.invoke(&self.schema.type_name, OperationKind::Read, &self.request(key, None))?;
        Ok(raw.object().map(|obj| self.schema.decode(obj)))
    }

    fn create(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<FieldMap, Error> {
        check_fields(&self.schema, key, fields, Mode::Full)?;
        let mut sent = fields.clone();
        for f in self.schema.iter().filter(|f| !f.identity) {
            if let (Some(default), false) = (&f.default, sent.contains_key(&f.name)) {
                sent.insert(f.name.clone(), default.clone());
            }
        }
        debug!(object_type = %self.schema.type_name, key = %key, fields = sent.len(), "create");
        self.write(session, OperationKind::Create, key, &self.request(key, Some(&sent)))?;
        Ok(sent)
    }

    fn update(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<(), Error> {
        check_fields(&self.schema, key, fields, Mode::Partial)?;
        debug!(object_type = %self.schema.type_name, key = %key, fields = fields.len(), "update");
        self.write(session, OperationKind::Update, key, &self.request(key, Some(fields)))?;
        Ok(())
    }

    fn delete(&self, session: &mut DeviceSession, key: &ObjectKey) -> Result<bool, Error> {
        self.schema.validate_key(key)?;
        let raw = self.write(session, OperationKind::Delete, key, &self.request(key, None))?;
        Ok(raw.deleted())
    }

    fn append(&self, session: &mut DeviceSession, key: &ObjectKey, fields: &FieldMap) -> Result<bool, Error> {
        check_append(&self.schema, fields)?;
        check_fields(&self.schema, key, fields, Mode::Partial)?;
        let raw = self.write(session, OperationKind::Append, key, &self.request(key, Some(fields)))?;
        Ok(raw.added() > 0)
    }
}
