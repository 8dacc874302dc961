//! Statement compiler boundary and the shipped T-SQL dialect.
//!
//! The orchestration core only depends on [`StatementCompiler`]; the
//! [`SqlServerCompiler`] below is the default dialect that turns criteria
//! trees into bracket-quoted SQL Server text.

use serde_json::Value as JsonValue;

use crate::criteria::Criteria;
use crate::error::AdapterError;
use crate::schema::{AttributeType, CollectionDefinition, ColumnSchema, Schema};
use crate::types::{Record, Value};

/// Turns abstract criteria, records, and definitions into dialect SQL.
pub trait StatementCompiler: Send + Sync {
    /// A full select for `criteria` against `collection`.
    fn select(&self, collection: &str, criteria: &Criteria) -> Result<String, AdapterError>;

    /// An insert for `record`, followed by a select of the generated key
    /// aliased `id` in a second recordset.
    fn insert(&self, collection: &str, record: &Record) -> Result<String, AdapterError>;

    /// Just the `WHERE ...` clause of `criteria` (empty string when the
    /// criteria carry no predicate).
    fn where_clause(&self, collection: &str, criteria: &Criteria) -> Result<String, AdapterError>;

    /// The `SET` body of an update statement.
    fn set_clause(&self, collection: &str, values: &Record) -> Result<String, AdapterError>;

    /// The column list of a `CREATE TABLE` statement.
    fn table_definition(
        &self,
        collection: &str,
        definition: &CollectionDefinition,
    ) -> Result<String, AdapterError>;

    /// Shape catalog-introspection rows into a normalized schema.
    fn normalize_schema(&self, rows: &[Record]) -> Schema;
}

/// The shipped SQL Server dialect.
#[derive(Debug, Clone, Default)]
pub struct SqlServerCompiler;

impl SqlServerCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StatementCompiler for SqlServerCompiler {
    fn select(&self, collection: &str, criteria: &Criteria) -> Result<String, AdapterError> {
        let mut statement = String::from("SELECT ");

        let aggregated = criteria.has_calculation() || !criteria.group_by.is_empty();
        if !aggregated && criteria.skip.is_none() {
            if let Some(limit) = criteria.limit {
                statement.push_str(&format!("TOP {limit} "));
            }
        }

        statement.push_str(&projection(criteria, aggregated));
        statement.push_str(" FROM ");
        statement.push_str(&quote_ident(collection));

        let where_sql = self.where_clause(collection, criteria)?;
        if !where_sql.is_empty() {
            statement.push(' ');
            statement.push_str(&where_sql);
        }

        if !criteria.group_by.is_empty() {
            let grouped: Vec<String> = criteria.group_by.iter().map(|c| quote_ident(c)).collect();
            statement.push_str(" GROUP BY ");
            statement.push_str(&grouped.join(", "));
        }

        let order = order_clause(criteria)?;
        if let Some(order) = &order {
            statement.push(' ');
            statement.push_str(order);
        }

        if let Some(skip) = criteria.skip {
            // OFFSET requires an ORDER BY; fall back to the injected
            // primary key, then to a constant ordering.
            if order.is_none() {
                match &criteria.primary_key {
                    Some(pk) => statement.push_str(&format!(" ORDER BY {}", quote_ident(pk))),
                    None => statement.push_str(" ORDER BY (SELECT NULL)"),
                }
            }
            statement.push_str(&format!(" OFFSET {skip} ROWS"));
            if let Some(limit) = criteria.limit {
                statement.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
            }
        }

        Ok(statement)
    }

    fn insert(&self, collection: &str, record: &Record) -> Result<String, AdapterError> {
        let table = quote_ident(collection);
        let body = if record.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<String> = record.keys().map(|k| quote_ident(k)).collect();
            let values: Vec<String> = record.iter().map(|(_, v)| value_literal(v)).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            )
        };
        Ok(format!("{body}; SELECT SCOPE_IDENTITY() AS [id];"))
    }

    fn where_clause(&self, _collection: &str, criteria: &Criteria) -> Result<String, AdapterError> {
        match &criteria.where_ {
            None | Some(JsonValue::Null) => Ok(String::new()),
            Some(clause) => {
                let rendered = predicate(clause, "AND")?;
                if rendered.is_empty() {
                    Ok(String::new())
                } else {
                    Ok(format!("WHERE {rendered}"))
                }
            }
        }
    }

    fn set_clause(&self, _collection: &str, values: &Record) -> Result<String, AdapterError> {
        if values.is_empty() {
            return Err(AdapterError::Validation(
                "update carries no values to set".to_string(),
            ));
        }
        let assignments: Vec<String> = values
            .iter()
            .map(|(name, value)| format!("{} = {}", quote_ident(name), value_literal(value)))
            .collect();
        Ok(assignments.join(", "))
    }

    fn table_definition(
        &self,
        collection: &str,
        definition: &CollectionDefinition,
    ) -> Result<String, AdapterError> {
        let columns: Vec<String> = definition
            .attributes
            .iter()
            .map(|(name, attr)| {
                let mut column = format!("{} {}", quote_ident(name), column_type(attr.column_type));
                if attr.auto_increment {
                    column.push_str(" IDENTITY(1,1)");
                }
                if name == &definition.primary_key {
                    column.push_str(" NOT NULL PRIMARY KEY");
                } else if attr.unique {
                    column.push_str(" UNIQUE");
                } else {
                    column.push_str(" NULL");
                }
                column
            })
            .collect();
        if columns.is_empty() {
            return Err(AdapterError::Validation(format!(
                "collection '{collection}' defines no attributes"
            )));
        }
        Ok(columns.join(", "))
    }

    fn normalize_schema(&self, rows: &[Record]) -> Schema {
        rows.iter()
            .filter_map(|row| {
                let name = row.get("ColumnName")?.as_text()?.to_string();
                let column = ColumnSchema {
                    column_name: name.clone(),
                    type_name: row
                        .get("TypeName")
                        .and_then(Value::as_text)
                        .unwrap_or_default()
                        .to_string(),
                    nullable: flag(row.get("Nullable")),
                    auto_increment: flag(row.get("AutoIncrement")),
                    unique: flag(row.get("Unique")),
                    primary_key: flag(row.get("PrimaryKey")),
                    indexed: row
                        .get("Indexed")
                        .and_then(Value::as_int)
                        .is_some_and(|count| count > 0),
                };
                Some((name, column))
            })
            .collect()
    }
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

fn projection(criteria: &Criteria, aggregated: bool) -> String {
    if aggregated {
        let mut parts: Vec<String> = criteria.group_by.iter().map(|c| quote_ident(c)).collect();
        for column in &criteria.sum {
            parts.push(format!("SUM({0}) AS {0}", quote_ident(column)));
        }
        for column in &criteria.average {
            parts.push(format!("AVG({0}) AS {0}", quote_ident(column)));
        }
        for column in &criteria.min {
            parts.push(format!("MIN({0}) AS {0}", quote_ident(column)));
        }
        for column in &criteria.max {
            parts.push(format!("MAX({0}) AS {0}", quote_ident(column)));
        }
        parts.join(", ")
    } else if let Some(select) = &criteria.select {
        if select.is_empty() {
            "*".to_string()
        } else {
            select
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        }
    } else {
        "*".to_string()
    }
}

fn order_clause(criteria: &Criteria) -> Result<Option<String>, AdapterError> {
    let Some(sort) = &criteria.sort else {
        return Ok(None);
    };
    match sort {
        JsonValue::String(raw) => Ok(Some(format!("ORDER BY {raw}"))),
        JsonValue::Object(map) => {
            if map.is_empty() {
                return Ok(None);
            }
            let parts: Vec<String> = map
                .iter()
                .map(|(column, direction)| {
                    let descending = matches!(direction, JsonValue::Number(n) if n.as_i64() == Some(-1))
                        || matches!(direction, JsonValue::String(s) if s.eq_ignore_ascii_case("desc"));
                    format!(
                        "{} {}",
                        quote_ident(column),
                        if descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            Ok(Some(format!("ORDER BY {}", parts.join(", "))))
        }
        other => Err(AdapterError::Validation(format!(
            "unsupported sort specification: {other}"
        ))),
    }
}

/// Render one `where` tree level, joining entries with `joiner`.
fn predicate(clause: &JsonValue, joiner: &str) -> Result<String, AdapterError> {
    let JsonValue::Object(map) = clause else {
        return Err(AdapterError::Validation(format!(
            "where clause must be an object, got {clause}"
        )));
    };
    let mut conditions = Vec::with_capacity(map.len());
    for (key, value) in map {
        if key.eq_ignore_ascii_case("or") || key.eq_ignore_ascii_case("and") {
            let JsonValue::Array(branches) = value else {
                return Err(AdapterError::Validation(format!(
                    "'{key}' expects an array of clauses"
                )));
            };
            let nested_joiner = if key.eq_ignore_ascii_case("or") { "OR" } else { "AND" };
            let rendered: Result<Vec<String>, AdapterError> = branches
                .iter()
                .map(|branch| predicate(branch, "AND"))
                .collect();
            conditions.push(format!("({})", rendered?.join(&format!(" {nested_joiner} "))));
        } else {
            conditions.push(attribute_condition(key, value)?);
        }
    }
    Ok(conditions.join(&format!(" {joiner} ")))
}

fn attribute_condition(attribute: &str, value: &JsonValue) -> Result<String, AdapterError> {
    let column = quote_ident(attribute);
    match value {
        JsonValue::Null => Ok(format!("{column} IS NULL")),
        JsonValue::Array(items) => {
            if items.is_empty() {
                // membership in the empty set matches nothing
                return Ok("1 = 0".to_string());
            }
            let literals: Result<Vec<String>, AdapterError> =
                items.iter().map(json_literal).collect();
            Ok(format!("{column} IN ({})", literals?.join(", ")))
        }
        JsonValue::Object(operators) => {
            let mut conditions = Vec::with_capacity(operators.len());
            for (operator, operand) in operators {
                conditions.push(operator_condition(&column, operator, operand)?);
            }
            Ok(conditions.join(" AND "))
        }
        scalar => Ok(format!("{column} = {}", json_literal(scalar)?)),
    }
}

fn operator_condition(
    column: &str,
    operator: &str,
    operand: &JsonValue,
) -> Result<String, AdapterError> {
    match operator {
        "<" | "lessThan" => Ok(format!("{column} < {}", json_literal(operand)?)),
        "<=" | "lessThanOrEqual" => Ok(format!("{column} <= {}", json_literal(operand)?)),
        ">" | "greaterThan" => Ok(format!("{column} > {}", json_literal(operand)?)),
        ">=" | "greaterThanOrEqual" => Ok(format!("{column} >= {}", json_literal(operand)?)),
        "!" | "!=" | "not" => match operand {
            JsonValue::Null => Ok(format!("{column} IS NOT NULL")),
            JsonValue::Array(items) => {
                if items.is_empty() {
                    return Ok("1 = 1".to_string());
                }
                let literals: Result<Vec<String>, AdapterError> =
                    items.iter().map(json_literal).collect();
                Ok(format!("{column} NOT IN ({})", literals?.join(", ")))
            }
            scalar => Ok(format!("{column} <> {}", json_literal(scalar)?)),
        },
        "like" => Ok(format!("{column} LIKE {}", text_literal(operand)?)),
        "contains" => Ok(format!(
            "{column} LIKE {}",
            pattern_literal(operand, true, true)?
        )),
        "startsWith" => Ok(format!(
            "{column} LIKE {}",
            pattern_literal(operand, false, true)?
        )),
        "endsWith" => Ok(format!(
            "{column} LIKE {}",
            pattern_literal(operand, true, false)?
        )),
        other => Err(AdapterError::Validation(format!(
            "unsupported where operator '{other}'"
        ))),
    }
}

fn pattern_literal(
    operand: &JsonValue,
    leading: bool,
    trailing: bool,
) -> Result<String, AdapterError> {
    let text = operand.as_str().ok_or_else(|| {
        AdapterError::Validation(format!("pattern operators expect text, got {operand}"))
    })?;
    let mut pattern = String::new();
    if leading {
        pattern.push('%');
    }
    pattern.push_str(text);
    if trailing {
        pattern.push('%');
    }
    Ok(quote_text(&pattern))
}

fn text_literal(operand: &JsonValue) -> Result<String, AdapterError> {
    match operand {
        JsonValue::String(s) => Ok(quote_text(s)),
        other => Err(AdapterError::Validation(format!(
            "LIKE expects text, got {other}"
        ))),
    }
}

fn json_literal(value: &JsonValue) -> Result<String, AdapterError> {
    match value {
        JsonValue::Null => Ok("NULL".to_string()),
        JsonValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::String(s) => Ok(quote_text(s)),
        composite => Err(AdapterError::Validation(format!(
            "cannot render {composite} as a scalar literal"
        ))),
    }
}

/// Render an attribute value as a SQL Server literal.
fn value_literal(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote_text(s),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Timestamp(dt) => quote_text(&dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        Value::Null => "NULL".to_string(),
        Value::Json(j) => quote_text(&j.to_string()),
        Value::Blob(bytes) => {
            let mut hex = String::with_capacity(2 + bytes.len() * 2);
            hex.push_str("0x");
            for byte in bytes {
                hex.push_str(&format!("{byte:02X}"));
            }
            hex
        }
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn column_type(attribute: AttributeType) -> &'static str {
    match attribute {
        AttributeType::Integer => "BIGINT",
        AttributeType::Float => "FLOAT",
        AttributeType::Text => "NVARCHAR(MAX)",
        AttributeType::Boolean => "BIT",
        AttributeType::DateTime => "DATETIME2",
        AttributeType::Json => "NVARCHAR(MAX)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiler() -> SqlServerCompiler {
        SqlServerCompiler::new()
    }

    #[test]
    fn select_renders_equality_and_top() {
        let criteria = Criteria::where_eq("id", &Value::Int(1)).with_limit(1);
        let sql = compiler().select("user", &criteria).unwrap();
        assert_eq!(sql, "SELECT TOP 1 * FROM [user] WHERE [id] = 1");
    }

    #[test]
    fn select_renders_membership() {
        let criteria = Criteria::where_in("id", &[Value::Int(1), Value::Int(3)]);
        let sql = compiler().select("user", &criteria).unwrap();
        assert_eq!(sql, "SELECT * FROM [user] WHERE [id] IN (1, 3)");
    }

    #[test]
    fn select_renders_sort_and_pagination() {
        let criteria = Criteria {
            sort: Some(json!({"name": -1})),
            limit: Some(10),
            skip: Some(20),
            ..Criteria::default()
        };
        let sql = compiler().select("user", &criteria).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM [user] ORDER BY [name] DESC OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn pagination_without_sort_orders_by_the_injected_primary_key() {
        let criteria = Criteria {
            skip: Some(5),
            primary_key: Some("id".to_string()),
            ..Criteria::default()
        };
        let sql = compiler().select("user", &criteria).unwrap();
        assert_eq!(sql, "SELECT * FROM [user] ORDER BY [id] OFFSET 5 ROWS");
    }

    #[test]
    fn aggregates_render_group_by_with_calculations() {
        let criteria = Criteria {
            group_by: vec!["country".to_string()],
            sum: vec!["amount".to_string()],
            ..Criteria::default()
        };
        let sql = compiler().select("orders", &criteria).unwrap();
        assert_eq!(
            sql,
            "SELECT [country], SUM([amount]) AS [amount] FROM [orders] GROUP BY [country]"
        );
    }

    #[test]
    fn where_clause_supports_operators_and_or() {
        let criteria = Criteria {
            where_: Some(json!({
                "age": {">=": 21},
                "or": [{"name": {"startsWith": "a"}}, {"name": null}]
            })),
            ..Criteria::default()
        };
        let sql = compiler().where_clause("user", &criteria).unwrap();
        assert_eq!(
            sql,
            "WHERE [age] >= 21 AND ([name] LIKE 'a%' OR [name] IS NULL)"
        );
    }

    #[test]
    fn text_literals_are_escaped() {
        let criteria = Criteria::where_eq("name", &Value::Text("o'hara".into()));
        let sql = compiler().where_clause("user", &criteria).unwrap();
        assert_eq!(sql, "WHERE [name] = 'o''hara'");
    }

    #[test]
    fn insert_appends_generated_key_select() {
        let mut record = Record::new();
        record.set("name", Value::Text("ada".into()));
        record.set("age", Value::Int(36));
        let sql = compiler().insert("user", &record).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO [user] ([age], [name]) VALUES (36, 'ada'); SELECT SCOPE_IDENTITY() AS [id];"
        );
    }

    #[test]
    fn empty_insert_uses_default_values() {
        let sql = compiler().insert("user", &Record::new()).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO [user] DEFAULT VALUES; SELECT SCOPE_IDENTITY() AS [id];"
        );
    }

    #[test]
    fn set_clause_rejects_empty_values() {
        assert!(compiler().set_clause("user", &Record::new()).is_err());
        let mut values = Record::new();
        values.set("name", Value::Text("x".into()));
        assert_eq!(
            compiler().set_clause("user", &values).unwrap(),
            "[name] = 'x'"
        );
    }

    #[test]
    fn table_definition_marks_identity_and_primary_key() {
        use crate::schema::AttributeDef;
        let definition = CollectionDefinition::new("id")
            .attribute("id", AttributeDef::of(AttributeType::Integer).auto_increment())
            .attribute("name", AttributeDef::of(AttributeType::Text).unique());
        let sql = compiler().table_definition("user", &definition).unwrap();
        assert_eq!(
            sql,
            "[id] BIGINT IDENTITY(1,1) NOT NULL PRIMARY KEY, [name] NVARCHAR(MAX) UNIQUE"
        );
    }

    #[test]
    fn normalize_schema_reads_catalog_flags() {
        let mut row = Record::new();
        row.set("ColumnName", Value::Text("id".into()));
        row.set("TypeName", Value::Text("int".into()));
        row.set("Nullable", Value::Bool(false));
        row.set("AutoIncrement", Value::Bool(true));
        row.set("Unique", Value::Int(1));
        row.set("PrimaryKey", Value::Int(1));
        row.set("Indexed", Value::Int(2));

        let schema = compiler().normalize_schema(&[row]);
        let column = schema.get("id").unwrap();
        assert!(column.auto_increment);
        assert!(column.primary_key);
        assert!(column.indexed);
        assert!(!column.nullable);
        assert_eq!(column.type_name, "int");
    }
}
