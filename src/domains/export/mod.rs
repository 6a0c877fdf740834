pub mod projection;
pub mod schemas;
pub mod service;
pub mod types;
pub mod writer;
pub mod writers;

pub use projection::{project, project_batch, FieldProjection};
pub use service::{ExportHandle, ExportService};
pub use types::{
    ExportArtifactMetadata, ExportFormat, ExportLimits, ExportOutcome, ExportRequest,
    ExportStats, ExportStatus,
};
pub use writer::{TabularWriter, WriterFactory};
pub use writers::{JsonLinesWriter, StreamingCsvWriter, StreamingParquetWriter};
