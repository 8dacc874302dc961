use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{Record, Value};

/// Declared type of a collection attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    Integer,
    Float,
    Text,
    Boolean,
    DateTime,
    Json,
}

/// One attribute of a collection definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributeDef {
    pub column_type: AttributeType,
    pub auto_increment: bool,
    pub unique: bool,
}

impl Default for AttributeDef {
    fn default() -> Self {
        Self {
            column_type: AttributeType::Text,
            auto_increment: false,
            unique: false,
        }
    }
}

impl AttributeDef {
    #[must_use]
    pub fn of(column_type: AttributeType) -> Self {
        Self {
            column_type,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A collection (table) as the mapping layer declares it at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub primary_key: String,
    pub attributes: BTreeMap<String, AttributeDef>,
}

impl CollectionDefinition {
    #[must_use]
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, def: AttributeDef) -> Self {
        self.attributes.insert(name.into(), def);
        self
    }

    /// Whether the primary key is an identity (auto-increment) column.
    ///
    /// An explicit declaration wins; with no declaration the conventional
    /// `id` name is treated as identity-style.
    #[must_use]
    pub fn identity_primary_key(&self) -> bool {
        self.attributes
            .get(&self.primary_key)
            .map_or(self.primary_key == "id", |attr| attr.auto_increment)
    }
}

/// One column of a normalized catalog schema, as produced by `describe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub column_name: String,
    pub type_name: String,
    pub nullable: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub indexed: bool,
}

/// Normalized schema keyed by column name.
pub type Schema = BTreeMap<String, ColumnSchema>;

/// Cast record values to the collection's declared attribute types.
///
/// Driver-native values come back as whatever the wire produced (bits as
/// ints, timestamps as text); the mapping layer expects the declared
/// types. Values that cannot be cast pass through untouched, as do
/// attributes without a declaration.
#[must_use]
pub fn cast_record(definition: &CollectionDefinition, mut record: Record) -> Record {
    let drained: Vec<(String, Value)> = std::mem::take(&mut record).into_iter().collect();
    drained
        .into_iter()
        .map(|(name, value)| {
            let cast = match definition.attributes.get(&name) {
                Some(attr) => cast_value(attr.column_type, value),
                None => value,
            };
            (name, cast)
        })
        .collect()
}

fn cast_value(column_type: AttributeType, value: Value) -> Value {
    if value.is_null() {
        return value;
    }
    match column_type {
        AttributeType::Integer => match &value {
            Value::Int(_) => value,
            Value::Float(f) if f.fract() == 0.0 => Value::Int(*f as i64),
            Value::Text(s) => s.parse::<i64>().map_or(value, Value::Int),
            Value::Bool(b) => Value::Int(i64::from(*b)),
            _ => value,
        },
        AttributeType::Float => match &value {
            Value::Float(_) => value,
            Value::Int(i) => Value::Float(*i as f64),
            Value::Text(s) => s.parse::<f64>().map_or(value, Value::Float),
            _ => value,
        },
        AttributeType::Boolean => match value.as_bool() {
            Some(b) => Value::Bool(b),
            None => value,
        },
        AttributeType::DateTime => match &value {
            Value::Timestamp(_) => value,
            Value::Text(s) => parse_timestamp(s).map_or(value, Value::Timestamp),
            _ => value,
        },
        AttributeType::Json => match &value {
            Value::Json(_) => value,
            Value::Text(s) => serde_json::from_str::<JsonValue>(s)
                .map_or(value, Value::Json),
            _ => value,
        },
        AttributeType::Text => match value {
            Value::Text(_) => value,
            Value::Int(i) => Value::Text(i.to_string()),
            Value::Float(f) => Value::Text(f.to_string()),
            other => other,
        },
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> CollectionDefinition {
        CollectionDefinition::new("id")
            .attribute("id", AttributeDef::of(AttributeType::Integer).auto_increment())
            .attribute("name", AttributeDef::of(AttributeType::Text))
            .attribute("active", AttributeDef::of(AttributeType::Boolean))
            .attribute("profile", AttributeDef::of(AttributeType::Json))
    }

    #[test]
    fn casts_bits_and_json_text_to_declared_types() {
        let mut record = Record::new();
        record.set("id", Value::Text("7".into()));
        record.set("active", Value::Int(1));
        record.set("profile", Value::Text("{\"a\":1}".into()));
        record.set("extra", Value::Int(9));

        let cast = cast_record(&users(), record);
        assert_eq!(cast.get("id"), Some(&Value::Int(7)));
        assert_eq!(cast.get("active"), Some(&Value::Bool(true)));
        assert_eq!(
            cast.get("profile"),
            Some(&Value::Json(serde_json::json!({"a": 1})))
        );
        // no declaration: untouched
        assert_eq!(cast.get("extra"), Some(&Value::Int(9)));
    }

    #[test]
    fn identity_primary_key_follows_declaration_then_name() {
        assert!(users().identity_primary_key());
        let natural = CollectionDefinition::new("code")
            .attribute("code", AttributeDef::of(AttributeType::Text));
        assert!(!natural.identity_primary_key());
        let bare = CollectionDefinition::new("id");
        assert!(bare.identity_primary_key());
    }
}
