//! Value preparation boundary: attribute values become store-native shapes
//! before they are rendered into a statement.

use crate::types::Value;

/// Coerce a raw attribute value into the representation the store expects.
pub trait ValuePreparer: Send + Sync {
    fn prepare(&self, value: Value) -> Value;
}

/// Default SQL Server coercions: timestamps and JSON become text, booleans
/// become bits, everything else passes through.
#[derive(Debug, Clone, Default)]
pub struct SqlServerValuePreparer;

impl SqlServerValuePreparer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ValuePreparer for SqlServerValuePreparer {
    fn prepare(&self, value: Value) -> Value {
        match value {
            Value::Timestamp(dt) => {
                Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            }
            Value::Bool(b) => Value::Int(i64::from(b)),
            Value::Json(j) => Value::Text(j.to_string()),
            other => other,
        }
    }
}
