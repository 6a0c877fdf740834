use serde::Serialize;
use thiserror::Error;

/// Errors surfaced at the search collaborator seam.
///
/// `Unavailable` is the only retryable variant; the paginator retries it with
/// bounded backoff before escalating. `Timeout` and `InvalidSpec` always
/// escalate untouched.
#[derive(Debug, Error, Clone, Serialize)]
pub enum SearchError {
    #[error("invalid search spec: {0}")]
    InvalidSpec(String),

    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("search fetch exceeded the {0}s batch timeout")]
    Timeout(u64),
}

/// Run-level errors owned by the export coordinator.
///
/// Reaching the entry limit is not represented here: truncation is a success
/// path surfaced through run metadata, never an error.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid search spec: {0}")]
    InvalidSpec(String),

    #[error("projection cannot combine include and exclude field lists")]
    InvalidProjectionSpec,

    #[error("search backend unavailable: {0}")]
    SearchUnavailable(String),

    #[error("search fetch exceeded the {0}s batch timeout")]
    SearchTimeout(u64),

    #[error("schema drift: batch fields [{actual}] do not match fixed columns [{expected}]")]
    SchemaDrift { expected: String, actual: String },

    #[error("destination write failed: {0}")]
    DestinationWrite(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("export cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SearchError> for ExportError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidSpec(msg) => ExportError::InvalidSpec(msg),
            SearchError::Unavailable(msg) => ExportError::SearchUnavailable(msg),
            SearchError::Timeout(secs) => ExportError::SearchTimeout(secs),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl ExportError {
    /// Stable kind tag recorded in the terminal outcome for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidSpec(_) => "InvalidSpec",
            ExportError::InvalidProjectionSpec => "InvalidProjectionSpec",
            ExportError::SearchUnavailable(_) => "SearchUnavailable",
            ExportError::SearchTimeout(_) => "SearchTimeout",
            ExportError::SchemaDrift { .. } => "SchemaDrift",
            ExportError::DestinationWrite(_) => "DestinationWriteError",
            ExportError::Io(_) => "Io",
            ExportError::Serialization(_) => "Serialization",
            ExportError::Cancelled => "Cancelled",
            ExportError::Internal(_) => "Internal",
        }
    }
}
