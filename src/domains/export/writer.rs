use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{ExportError, ExportResult};

use super::types::{ExportFormat, ExportStats};
use super::writers::{JsonLinesWriter, StreamingCsvWriter, StreamingParquetWriter};

/// Streaming encoder contract shared by all output formats.
///
/// A writer is owned by exactly one run and fed batches strictly in
/// pagination order; memory held at any time is bounded by one batch plus
/// encoder-internal buffering.
#[async_trait]
pub trait TabularWriter: Send {
    /// Encode one batch of projected records, in order. Returns rows written.
    async fn write_batch(&mut self, records: &[Value]) -> ExportResult<usize>;

    /// Flush buffered data and close the encoder, returning final statistics.
    async fn finalize(self: Box<Self>) -> ExportResult<ExportStats>;

    fn format(&self) -> ExportFormat;
}

/// Writer factory for creating format-specific writers
pub struct WriterFactory;

impl WriterFactory {
    /// `columns` fixes tabular column identity up front (the include-list
    /// order); when `None`, the first batch fixes it in lexical order.
    pub async fn create(
        format: ExportFormat,
        path: &Path,
        columns: Option<Vec<String>>,
    ) -> ExportResult<Box<dyn TabularWriter>> {
        match format {
            ExportFormat::Csv => Ok(Box::new(StreamingCsvWriter::create(path, columns).await?)),
            ExportFormat::Parquet => {
                Ok(Box::new(StreamingParquetWriter::create(path, columns)))
            }
            ExportFormat::Json => Ok(Box::new(JsonLinesWriter::create(path).await?)),
        }
    }
}

/// Column identity fixed for a tabular run.
///
/// Hinted columns tolerate records missing some of the requested fields
/// (empty cells favor export completion); columns derived from the first
/// batch require exact field-set equality on every later record.
#[derive(Debug, Clone)]
pub(crate) struct ColumnSet {
    pub names: Vec<String>,
    strict: bool,
}

impl ColumnSet {
    pub fn from_hint(names: Vec<String>) -> Self {
        Self {
            names,
            strict: false,
        }
    }

    pub fn from_first_record(record: &Map<String, Value>) -> Self {
        Self {
            names: record.keys().cloned().collect(),
            strict: true,
        }
    }

    pub fn ensure_matches(&self, record: &Map<String, Value>) -> ExportResult<()> {
        let fits = if self.strict {
            record.len() == self.names.len()
                && self.names.iter().all(|name| record.contains_key(name))
        } else {
            record.keys().all(|key| self.names.iter().any(|n| n == key))
        };

        if fits {
            Ok(())
        } else {
            Err(ExportError::SchemaDrift {
                expected: self.names.join(","),
                actual: record.keys().cloned().collect::<Vec<_>>().join(","),
            })
        }
    }
}

pub(crate) fn record_object(value: &Value) -> ExportResult<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ExportError::Serialization("expected a JSON object record".to_string()))
}
