use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domains::core::destination::DestinationRef;
use crate::domains::search::types::SearchSpec;
use crate::errors::{ExportError, ExportResult};

/// Output formats supported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Parquet,
    Json,
}

impl ExportFormat {
    /// File extension for this format
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
            ExportFormat::Json => "json",
        }
    }
}

/// Resource bounds for one run, read once at start and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct ExportLimits {
    /// Deadline for each individual search fetch.
    pub search_batch_timeout: Duration,
    /// Hard cap on total entries exported by the run.
    pub max_entries_export_limit: u64,
}

impl ExportLimits {
    pub fn validate(&self) -> ExportResult<()> {
        if self.search_batch_timeout.is_zero() {
            return Err(ExportError::InvalidSpec(
                "search_batch_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_entries_export_limit == 0 {
            return Err(ExportError::InvalidSpec(
                "max_entries_export_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run statuses. Transitions are monotonic; terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportStatus::Succeeded | ExportStatus::Failed(_) | ExportStatus::Cancelled
        )
    }
}

/// What the caller asked for: query, output format, and where to put it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub spec: SearchSpec,
    pub format: ExportFormat,
    pub destination: DestinationRef,
    /// Bundle the data file and its metadata into a single zip artifact.
    #[serde(default)]
    pub zip_output: bool,
}

/// Encoder-side statistics accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStats {
    pub entries_written: u64,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Contents of the metadata.json written beside the exported data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportArtifactMetadata {
    pub format: ExportFormat,
    /// Serialization flavor for JSON runs ("newline-delimited").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_flavor: Option<String>,
    pub entries_exported: u64,
    pub entries_available: Option<u64>,
    pub truncated: bool,
    pub search_start_time: DateTime<Utc>,
    pub search_end_time: DateTime<Utc>,
    pub stats: ExportStats,
    pub checksum_sha256: Option<String>,
    pub schema_version: u32,
}

/// Terminal result surface handed back to the action framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub run_id: Uuid,
    pub status: ExportStatus,
    pub entries_exported: u64,
    pub entries_available: Option<u64>,
    /// True when the run stopped at the configured entry limit. Not an error.
    pub truncated: bool,
    pub error_kind: Option<String>,
    pub destination_location: Option<PathBuf>,
}
