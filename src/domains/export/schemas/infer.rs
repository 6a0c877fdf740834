use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde_json::Value;

/// Arrow type for a single JSON value.
///
/// Nested structures are carried as JSON text rather than Arrow nested
/// types: column identity, not structural fidelity, is what tabular export
/// guarantees.
pub fn value_data_type(value: &Value) -> DataType {
    match value {
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => DataType::Int64,
        Value::Number(_) => DataType::Float64,
        Value::String(_) => DataType::Utf8,
        Value::Null | Value::Array(_) | Value::Object(_) => DataType::Utf8,
    }
}

/// Derive the run's Parquet schema from the fixed column set and the first
/// batch: the first non-null value per column decides its type, and a column
/// never observed non-null falls back to nullable text.
pub fn infer_schema(columns: &[String], records: &[Value]) -> SchemaRef {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| {
            let data_type = records
                .iter()
                .find_map(|record| {
                    record
                        .as_object()
                        .and_then(|obj| obj.get(name))
                        .filter(|value| !value.is_null())
                })
                .map(value_data_type)
                .unwrap_or(DataType::Utf8);
            Field::new(name, data_type, true)
        })
        .collect();

    Arc::new(Schema::new(fields))
}
