use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::domains::export::types::{ExportFormat, ExportStats};
use crate::domains::export::writer::{record_object, ColumnSet, TabularWriter};
use crate::errors::{ExportError, ExportResult};

/// Streaming RFC-4180 CSV writer.
///
/// The header row is written once, from the hinted columns or the first
/// batch. Each batch is encoded into an in-memory buffer with the `csv`
/// crate, then flushed to the file.
pub struct StreamingCsvWriter {
    inner: BufWriter<File>,
    columns: Option<ColumnSet>,
    header_written: bool,
    stats: ExportStats,
    start_time: Instant,
}

impl StreamingCsvWriter {
    pub async fn create(path: &Path, columns: Option<Vec<String>>) -> ExportResult<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            inner: BufWriter::new(file),
            columns: columns.map(ColumnSet::from_hint),
            header_written: false,
            stats: ExportStats::default(),
            start_time: Instant::now(),
        })
    }

    /// Flatten one field value into a CSV cell. Scalar arrays are joined
    /// with "; "; nested objects are serialized as JSON text.
    fn format_field(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(Self::format_field)
                .collect::<Vec<_>>()
                .join("; "),
            Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
        }
    }

    async fn flush_buffer(&mut self, buffer: Vec<u8>) -> ExportResult<()> {
        self.inner.write_all(&buffer).await?;
        self.stats.bytes_written += buffer.len() as u64;
        Ok(())
    }
}

#[async_trait]
impl TabularWriter for StreamingCsvWriter {
    async fn write_batch(&mut self, records: &[Value]) -> ExportResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => {
                let columns = ColumnSet::from_first_record(record_object(&records[0])?);
                self.columns = Some(columns.clone());
                columns
            }
        };

        let mut buffer = Vec::new();
        {
            let mut wtr = csv::WriterBuilder::new().from_writer(&mut buffer);
            if !self.header_written {
                wtr.write_record(&columns.names)
                    .map_err(|e| ExportError::Serialization(e.to_string()))?;
                self.header_written = true;
            }
            for record in records {
                let obj = record_object(record)?;
                columns.ensure_matches(obj)?;
                let row: Vec<String> = columns
                    .names
                    .iter()
                    .map(|name| obj.get(name).map(Self::format_field).unwrap_or_default())
                    .collect();
                wtr.write_record(&row)
                    .map_err(|e| ExportError::Serialization(e.to_string()))?;
            }
            wtr.flush()?;
        }

        self.flush_buffer(buffer).await?;
        self.stats.entries_written += records.len() as u64;
        Ok(records.len())
    }

    async fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        // A run that produced no rows still gets its header when the column
        // set was fixed by an include list.
        if !self.header_written {
            if let Some(columns) = self.columns.clone() {
                let mut buffer = Vec::new();
                {
                    let mut wtr = csv::WriterBuilder::new().from_writer(&mut buffer);
                    wtr.write_record(&columns.names)
                        .map_err(|e| ExportError::Serialization(e.to_string()))?;
                    wtr.flush()?;
                }
                self.flush_buffer(buffer).await?;
            }
        }

        self.inner.flush().await?;
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        Ok(self.stats)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn read_lines(path: &Path) -> Vec<String> {
        let contents = tokio::fs::read_to_string(path).await.expect("read csv");
        contents.lines().map(|l| l.to_string()).collect()
    }

    #[tokio::test]
    async fn hinted_columns_drive_header_and_cell_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut writer = StreamingCsvWriter::create(
            &path,
            Some(vec!["id".to_string(), "temperature".to_string()]),
        )
        .await
        .expect("writer");

        writer
            .write_batch(&[
                json!({"id": "a", "temperature": 300.0}),
                json!({"id": "b"}),
            ])
            .await
            .expect("write");
        let stats = Box::new(writer).finalize().await.expect("finalize");

        let lines = read_lines(&path).await;
        assert_eq!(lines[0], "id,temperature");
        assert_eq!(lines[1], "a,300.0");
        // missing included field becomes an empty cell
        assert_eq!(lines[2], "b,");
        assert_eq!(stats.entries_written, 2);
    }

    #[tokio::test]
    async fn first_batch_fixes_columns_in_lexical_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut writer = StreamingCsvWriter::create(&path, None).await.expect("writer");

        writer
            .write_batch(&[json!({"temperature": 1, "id": "a"})])
            .await
            .expect("write");
        Box::new(writer).finalize().await.expect("finalize");

        let lines = read_lines(&path).await;
        assert_eq!(lines[0], "id,temperature");
    }

    #[tokio::test]
    async fn later_batch_with_different_fields_is_schema_drift() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut writer = StreamingCsvWriter::create(&path, None).await.expect("writer");

        writer
            .write_batch(&[json!({"id": "a", "temperature": 1})])
            .await
            .expect("write");
        let err = writer
            .write_batch(&[json!({"id": "b", "pressure": 2})])
            .await
            .expect_err("drift");
        assert!(matches!(err, ExportError::SchemaDrift { .. }));
    }

    #[tokio::test]
    async fn arrays_and_nested_objects_are_flattened() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut writer = StreamingCsvWriter::create(&path, None).await.expect("writer");

        writer
            .write_batch(&[json!({
                "elements": ["H", "O"],
                "method": {"name": "DFT"},
            })])
            .await
            .expect("write");
        Box::new(writer).finalize().await.expect("finalize");

        let lines = read_lines(&path).await;
        assert_eq!(lines[0], "elements,method");
        assert_eq!(lines[1], "H; O,\"{\"\"name\"\":\"\"DFT\"\"}\"");
    }

    #[tokio::test]
    async fn empty_run_with_hint_still_writes_the_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let writer = StreamingCsvWriter::create(&path, Some(vec!["id".to_string()]))
            .await
            .expect("writer");
        Box::new(writer).finalize().await.expect("finalize");

        let lines = read_lines(&path).await;
        assert_eq!(lines, vec!["id".to_string()]);
    }
}
