use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{
    ArrayBuilder, ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::AsyncArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};
use tokio::fs::File;

use crate::domains::export::schemas::infer_schema;
use crate::domains::export::types::{ExportFormat, ExportStats};
use crate::domains::export::writer::{record_object, ColumnSet, TabularWriter};
use crate::errors::{ExportError, ExportResult};

/// Streaming Parquet writer over Arrow record batches.
///
/// The file and its schema are created lazily from the first batch (or the
/// hinted column order), then every batch is converted column-by-column and
/// appended through `AsyncArrowWriter`.
pub struct StreamingParquetWriter {
    path: PathBuf,
    column_hint: Option<Vec<String>>,
    session: Option<OpenSession>,
    stats: ExportStats,
    start_time: Instant,
}

struct OpenSession {
    writer: AsyncArrowWriter<File>,
    schema: SchemaRef,
    columns: ColumnSet,
}

impl StreamingParquetWriter {
    pub fn create(path: &Path, columns: Option<Vec<String>>) -> Self {
        Self {
            path: path.to_path_buf(),
            column_hint: columns,
            session: None,
            stats: ExportStats::default(),
            start_time: Instant::now(),
        }
    }

    fn writer_properties() -> WriterProperties {
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_dictionary_enabled(true)
            .build()
    }

    async fn open_session(&mut self, first_batch: &[Value]) -> ExportResult<()> {
        let columns = match self.column_hint.take() {
            Some(names) => ColumnSet::from_hint(names),
            None => ColumnSet::from_first_record(record_object(&first_batch[0])?),
        };
        let schema = infer_schema(&columns.names, first_batch);

        let file = File::create(&self.path).await?;
        let writer = AsyncArrowWriter::try_new(file, schema.clone(), Some(Self::writer_properties()))
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        self.session = Some(OpenSession {
            writer,
            schema,
            columns,
        });
        Ok(())
    }
}

#[async_trait]
impl TabularWriter for StreamingParquetWriter {
    async fn write_batch(&mut self, records: &[Value]) -> ExportResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.session.is_none() {
            self.open_session(records).await?;
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ExportError::Internal("parquet session not open".to_string()))?;

        let mut builder = ColumnBatchBuilder::new(session.schema.clone());
        for record in records {
            let obj = record_object(record)?;
            session.columns.ensure_matches(obj)?;
            builder.append_record(obj)?;
        }
        let batch = builder.finish()?;

        session
            .writer
            .write(&batch)
            .await
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        self.stats.entries_written += records.len() as u64;
        Ok(records.len())
    }

    async fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                // Zero-row run: still produce a valid (possibly columnless)
                // Parquet file so the artifact exists.
                let schema = match self.column_hint.take() {
                    Some(names) => infer_schema(&names, &[]),
                    None => Arc::new(Schema::empty()),
                };
                let file = File::create(&self.path).await?;
                let writer =
                    AsyncArrowWriter::try_new(file, schema.clone(), Some(Self::writer_properties()))
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                OpenSession {
                    writer,
                    schema,
                    columns: ColumnSet::from_hint(Vec::new()),
                }
            }
        };

        session
            .writer
            .close()
            .await
            .map_err(|e| ExportError::Serialization(e.to_string()))?;

        self.stats.bytes_written = tokio::fs::metadata(&self.path).await?.len();
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        Ok(self.stats)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Parquet
    }
}

/// Accumulates one batch of JSON records into typed Arrow columns.
struct ColumnBatchBuilder {
    schema: SchemaRef,
    builders: Vec<Box<dyn ArrayBuilder>>,
}

impl ColumnBatchBuilder {
    fn new(schema: SchemaRef) -> Self {
        let builders = schema
            .fields()
            .iter()
            .map(|field| Self::create_builder(field.data_type()))
            .collect();
        Self { schema, builders }
    }

    fn create_builder(data_type: &DataType) -> Box<dyn ArrayBuilder> {
        match data_type {
            DataType::Boolean => Box::new(BooleanBuilder::new()),
            DataType::Int64 => Box::new(Int64Builder::new()),
            DataType::Float64 => Box::new(Float64Builder::new()),
            _ => Box::new(StringBuilder::new()),
        }
    }

    fn append_record(&mut self, record: &Map<String, Value>) -> ExportResult<()> {
        for (index, field) in self.schema.fields().iter().enumerate() {
            let value = record.get(field.name()).filter(|v| !v.is_null());
            match field.data_type() {
                DataType::Boolean => {
                    let builder = Self::downcast::<BooleanBuilder>(&mut self.builders[index])?;
                    match value {
                        Some(v) => builder.append_value(v.as_bool().ok_or_else(|| {
                            type_mismatch(field.name(), "boolean", v)
                        })?),
                        None => builder.append_null(),
                    }
                }
                DataType::Int64 => {
                    let builder = Self::downcast::<Int64Builder>(&mut self.builders[index])?;
                    match value {
                        Some(v) => builder.append_value(v.as_i64().ok_or_else(|| {
                            type_mismatch(field.name(), "integer", v)
                        })?),
                        None => builder.append_null(),
                    }
                }
                DataType::Float64 => {
                    let builder = Self::downcast::<Float64Builder>(&mut self.builders[index])?;
                    match value {
                        Some(v) => builder.append_value(v.as_f64().ok_or_else(|| {
                            type_mismatch(field.name(), "float", v)
                        })?),
                        None => builder.append_null(),
                    }
                }
                _ => {
                    let builder = Self::downcast::<StringBuilder>(&mut self.builders[index])?;
                    match value {
                        Some(Value::String(s)) => builder.append_value(s),
                        Some(other) => builder.append_value(
                            serde_json::to_string(other).unwrap_or_default(),
                        ),
                        None => builder.append_null(),
                    }
                }
            }
        }
        Ok(())
    }

    fn downcast<B: ArrayBuilder>(builder: &mut Box<dyn ArrayBuilder>) -> ExportResult<&mut B> {
        builder
            .as_any_mut()
            .downcast_mut::<B>()
            .ok_or_else(|| ExportError::Internal("column builder type mismatch".to_string()))
    }

    fn finish(&mut self) -> ExportResult<RecordBatch> {
        let arrays: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        RecordBatch::try_new(self.schema.clone(), arrays)
            .map_err(|e| ExportError::Serialization(e.to_string()))
    }
}

fn type_mismatch(column: &str, expected: &str, value: &Value) -> ExportError {
    ExportError::Serialization(format!(
        "column {:?} expected {} but got {}",
        column, expected, value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn batches_accumulate_rows_across_writes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let mut writer = StreamingParquetWriter::create(&path, None);

        writer
            .write_batch(&[
                json!({"id": "a", "count": 1, "temperature": 273.15}),
                json!({"id": "b", "count": 2, "temperature": 300.0}),
            ])
            .await
            .expect("first batch");
        writer
            .write_batch(&[json!({"id": "c", "count": 3, "temperature": 310.0})])
            .await
            .expect("second batch");

        let stats = Box::new(writer).finalize().await.expect("finalize");
        assert_eq!(stats.entries_written, 3);
        assert!(stats.bytes_written > 0);
        assert!(tokio::fs::metadata(&path).await.expect("file").len() > 0);
    }

    #[tokio::test]
    async fn field_set_change_fails_with_schema_drift() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let mut writer = StreamingParquetWriter::create(&path, None);

        writer
            .write_batch(&[json!({"id": "a", "temperature": 273.15})])
            .await
            .expect("first batch");
        let err = writer
            .write_batch(&[json!({"id": "b", "pressure": 1.0})])
            .await
            .expect_err("drift");
        assert!(matches!(err, ExportError::SchemaDrift { .. }));
    }

    #[tokio::test]
    async fn nested_values_are_written_as_json_text() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let mut writer = StreamingParquetWriter::create(&path, None);

        writer
            .write_batch(&[json!({"id": "a", "method": {"name": "DFT"}})])
            .await
            .expect("batch");
        let stats = Box::new(writer).finalize().await.expect("finalize");
        assert_eq!(stats.entries_written, 1);
    }

    #[tokio::test]
    async fn zero_row_run_still_produces_an_artifact() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.parquet");
        let writer = StreamingParquetWriter::create(&path, Some(vec!["id".to_string()]));

        let stats = Box::new(writer).finalize().await.expect("finalize");
        assert_eq!(stats.entries_written, 0);
        assert!(tokio::fs::metadata(&path).await.expect("file").len() > 0);
    }
}
