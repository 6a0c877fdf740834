mod error;

pub use error::{ExportError, SearchError};

/// Result type for search collaborator operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type for export run operations
pub type ExportResult<T> = Result<T, ExportError>;
