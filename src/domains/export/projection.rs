use serde_json::Value;

use crate::domains::search::types::SearchSpec;
use crate::errors::{ExportError, ExportResult};

/// Worker bound for intra-batch projection fan-out.
pub const PROJECTION_WORKERS: usize = 4;

/// Batches smaller than this are projected inline.
const PARALLEL_THRESHOLD: usize = 256;

/// Validated include/exclude field selection for one run.
#[derive(Debug, Clone, Default)]
pub struct FieldProjection {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FieldProjection {
    /// Combining include and exclude is a configuration error, rejected
    /// before any batch is consumed.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> ExportResult<Self> {
        if !include.is_empty() && !exclude.is_empty() {
            return Err(ExportError::InvalidProjectionSpec);
        }
        Ok(Self { include, exclude })
    }

    pub fn from_spec(spec: &SearchSpec) -> ExportResult<Self> {
        Self::new(spec.include_fields.clone(), spec.exclude_fields.clone())
    }

    pub fn is_identity(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Column order the tabular encoders must follow when an include list
    /// fixes it. Without one, the first batch fixes columns in lexical order.
    pub fn column_hint(&self) -> Option<Vec<String>> {
        if self.include.is_empty() {
            None
        } else {
            Some(self.include.clone())
        }
    }
}

/// Apply the projection to one record. Pure; safe to call concurrently.
///
/// Requested fields missing from the record are silently omitted so a sparse
/// record cannot fail an otherwise healthy export.
pub fn project(record: &Value, projection: &FieldProjection) -> Value {
    let Some(obj) = record.as_object() else {
        return record.clone();
    };
    if projection.is_identity() {
        return record.clone();
    }

    let mut out = serde_json::Map::new();
    if !projection.include.is_empty() {
        for field in &projection.include {
            if let Some(value) = obj.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    } else {
        for (key, value) in obj {
            if !projection.exclude.iter().any(|excluded| excluded == key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(out)
}

/// Project a whole batch, preserving record order.
///
/// Large batches are split across a fixed worker count and reassembled in
/// chunk order; small ones are handled inline.
pub async fn project_batch(
    records: Vec<Value>,
    projection: &FieldProjection,
) -> ExportResult<Vec<Value>> {
    if projection.is_identity() {
        return Ok(records);
    }
    if records.len() < PARALLEL_THRESHOLD {
        return Ok(records.iter().map(|r| project(r, projection)).collect());
    }

    let chunk_len = records.len().div_ceil(PROJECTION_WORKERS);
    let handles: Vec<_> = records
        .chunks(chunk_len)
        .map(|chunk| {
            let chunk = chunk.to_vec();
            let projection = projection.clone();
            tokio::spawn(async move {
                chunk
                    .iter()
                    .map(|record| project(record, &projection))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let parts = futures::future::try_join_all(handles)
        .await
        .map_err(|e| ExportError::Internal(format!("projection worker failed: {}", e)))?;

    Ok(parts.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_projection_is_identity() {
        let projection = FieldProjection::new(Vec::new(), Vec::new()).expect("valid");
        let record = json!({"id": "a", "temperature": 300.0});
        assert_eq!(project(&record, &projection), record);
    }

    #[test]
    fn include_restricts_to_requested_fields() {
        let projection =
            FieldProjection::new(vec!["id".into(), "temperature".into()], Vec::new())
                .expect("valid");
        let record = json!({"id": "a", "temperature": 300.0, "formula": "H2O"});
        assert_eq!(
            project(&record, &projection),
            json!({"id": "a", "temperature": 300.0})
        );
    }

    #[test]
    fn missing_included_fields_are_silently_omitted() {
        let projection =
            FieldProjection::new(vec!["id".into(), "pressure".into()], Vec::new())
                .expect("valid");
        let record = json!({"id": "a", "temperature": 300.0});
        assert_eq!(project(&record, &projection), json!({"id": "a"}));
    }

    #[test]
    fn exclude_drops_only_the_listed_fields() {
        let projection = FieldProjection::new(Vec::new(), vec!["formula".into()]).expect("valid");
        let record = json!({"id": "a", "temperature": 300.0, "formula": "H2O"});
        assert_eq!(
            project(&record, &projection),
            json!({"id": "a", "temperature": 300.0})
        );
    }

    #[test]
    fn include_and_exclude_together_is_rejected() {
        let err = FieldProjection::new(vec!["id".into()], vec!["formula".into()])
            .err()
            .expect("config error");
        assert!(matches!(err, ExportError::InvalidProjectionSpec));
    }

    #[test]
    fn projection_is_idempotent() {
        let projection =
            FieldProjection::new(vec!["id".into(), "temperature".into()], Vec::new())
                .expect("valid");
        let record = json!({"id": "a", "temperature": 300.0, "formula": "H2O"});
        let once = project(&record, &projection);
        let twice = project(&once, &projection);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn batch_projection_preserves_record_order() {
        let projection = FieldProjection::new(vec!["id".into()], Vec::new()).expect("valid");
        let records: Vec<_> = (0..1000)
            .map(|i| json!({"id": i, "noise": "x"}))
            .collect();

        let projected = project_batch(records, &projection).await.expect("batch");
        assert_eq!(projected.len(), 1000);
        for (i, record) in projected.iter().enumerate() {
            assert_eq!(record, &json!({"id": i}));
        }
    }
}
