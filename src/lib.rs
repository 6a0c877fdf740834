//! Batch export pipeline: streams a paginated search result set into CSV,
//! Parquet, or JSON Lines artifacts under a per-fetch time budget and a
//! global entry cap.

// Public modules
pub mod config;
pub mod domains;
pub mod errors;

pub use config::ExportConfig;
pub use domains::core::destination::{DestinationRef, DestinationStore, LocalDestinationStore};
pub use domains::export::service::{ExportHandle, ExportService};
pub use domains::export::types::{
    ExportFormat, ExportLimits, ExportOutcome, ExportRequest, ExportStatus,
};
pub use domains::search::paginator::QueryPaginator;
pub use domains::search::repository::SearchClient;
pub use domains::search::types::{EntryBatch, PageCursor, SearchSpec};
pub use errors::{ExportError, SearchError};
