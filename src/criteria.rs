use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::error::AdapterError;
use crate::types::Value;

/// The abstract query description passed down by the mapping layer.
///
/// `where`/`sort` predicates stay as JSON trees; they cross the adapter
/// untouched on their way to the statement compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Criteria {
    #[serde(rename = "where")]
    pub where_: Option<JsonValue>,
    pub select: Option<Vec<String>>,
    pub joins: Vec<JoinInstruction>,
    pub sort: Option<JsonValue>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub group_by: Vec<String>,
    pub sum: Vec<String>,
    pub average: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
    /// Injected by the adapter before compilation; the compiler uses it
    /// for deterministic pagination ordering.
    #[serde(rename = "__primaryKey__")]
    pub primary_key: Option<String>,
}

impl Criteria {
    /// A single-attribute equality predicate.
    #[must_use]
    pub fn where_eq(attribute: &str, value: &Value) -> Criteria {
        Criteria {
            where_: Some(json!({ attribute: value.to_json() })),
            ..Criteria::default()
        }
    }

    /// A membership predicate over a set of values.
    #[must_use]
    pub fn where_in(attribute: &str, values: &[Value]) -> Criteria {
        let rendered: Vec<JsonValue> = values.iter().map(Value::to_json).collect();
        Criteria {
            where_: Some(json!({ attribute: rendered })),
            ..Criteria::default()
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Criteria {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn has_aggregates(&self) -> bool {
        !self.group_by.is_empty() || self.has_calculation()
    }

    #[must_use]
    pub fn has_calculation(&self) -> bool {
        !self.sum.is_empty()
            || !self.average.is_empty()
            || !self.min.is_empty()
            || !self.max.is_empty()
    }

    /// `groupBy` must be paired with at least one calculation.
    ///
    /// Checked before any statement is issued; a bare `groupBy` is a
    /// request the dialect cannot answer meaningfully.
    pub fn validate_aggregates(&self) -> Result<(), AdapterError> {
        if self.has_aggregates() && !self.has_calculation() {
            return Err(AdapterError::Validation(
                "cannot groupBy without a calculation".to_string(),
            ));
        }
        Ok(())
    }
}

/// One join relation as the mapping layer plans it.
///
/// Opaque to the adapter core: it is carried to the external stitching
/// algorithm, which drives single-collection finds through the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinInstruction {
    pub parent: String,
    pub parent_key: String,
    pub child: String,
    pub child_key: String,
    pub alias: Option<String>,
    /// `true` when the child side is a collection (one-to-many).
    pub collection: bool,
    pub criteria: Option<Box<Criteria>>,
}
