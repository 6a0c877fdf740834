pub mod core;
pub mod export;
pub mod search;

pub use export::{ExportFormat, ExportOutcome, ExportRequest, ExportService, ExportStatus};
pub use search::{SearchClient, SearchSpec};
