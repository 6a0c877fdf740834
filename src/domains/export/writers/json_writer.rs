use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::domains::export::types::{ExportFormat, ExportStats};
use crate::domains::export::writer::TabularWriter;
use crate::errors::ExportResult;

const FLUSH_THRESHOLD: usize = 512 * 1024;

/// Newline-delimited JSON writer.
///
/// Each record is serialized independently, so heterogeneous field sets are
/// fine here; no schema state is kept. Lines accumulate in a string buffer
/// flushed at a size threshold.
pub struct JsonLinesWriter {
    inner: BufWriter<File>,
    buffer: String,
    stats: ExportStats,
    start_time: Instant,
}

impl JsonLinesWriter {
    pub async fn create(path: &Path) -> ExportResult<Self> {
        let file = File::create(path).await?;
        Ok(Self {
            inner: BufWriter::new(file),
            buffer: String::with_capacity(256 * 1024),
            stats: ExportStats::default(),
            start_time: Instant::now(),
        })
    }

    async fn flush_lines(&mut self) -> ExportResult<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(self.buffer.as_bytes()).await?;
            self.stats.bytes_written += self.buffer.len() as u64;
            self.buffer.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl TabularWriter for JsonLinesWriter {
    async fn write_batch(&mut self, records: &[Value]) -> ExportResult<usize> {
        for record in records {
            let line = serde_json::to_string(record)?;
            if self.buffer.len() + line.len() + 1 > FLUSH_THRESHOLD && !self.buffer.is_empty() {
                self.flush_lines().await?;
            }
            self.buffer.push_str(&line);
            self.buffer.push('\n');
        }
        self.stats.entries_written += records.len() as u64;
        Ok(records.len())
    }

    async fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        self.flush_lines().await?;
        self.inner.flush().await?;
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        Ok(self.stats)
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}
