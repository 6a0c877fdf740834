use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::domains::core::destination::DestinationStore;
use crate::domains::export::projection::{project_batch, FieldProjection};
use crate::domains::export::types::{
    ExportArtifactMetadata, ExportFormat, ExportLimits, ExportOutcome, ExportRequest,
    ExportStats, ExportStatus,
};
use crate::domains::export::writer::{TabularWriter, WriterFactory};
use crate::domains::search::paginator::QueryPaginator;
use crate::domains::search::repository::SearchClient;
use crate::errors::{ExportError, ExportResult};

pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Coordinates one export run: paginate -> project -> encode -> commit.
///
/// The coordinator is the only mutator of run state and the sole authority
/// for terminal status transitions; stage errors propagate up to it and are
/// never recovered lower down.
pub struct ExportService {
    search: Arc<dyn SearchClient>,
    destination: Arc<dyn DestinationStore>,
}

/// Handle the action framework uses to observe and cancel a running export.
///
/// Cancellation is cooperative: the run notices the flag between batches,
/// never mid-batch.
pub struct ExportHandle {
    id: Uuid,
    status_rx: watch::Receiver<ExportStatus>,
    cancel: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<ExportOutcome>,
}

impl ExportHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> ExportStatus {
        self.status_rx.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> ExportOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("export {} task aborted: {}", self.id, err);
                ExportOutcome {
                    run_id: self.id,
                    status: ExportStatus::Failed("Internal".to_string()),
                    entries_exported: 0,
                    entries_available: None,
                    truncated: false,
                    error_kind: Some("Internal".to_string()),
                    destination_location: None,
                }
            }
        }
    }
}

impl ExportService {
    pub fn new(search: Arc<dyn SearchClient>, destination: Arc<dyn DestinationStore>) -> Self {
        Self {
            search,
            destination,
        }
    }

    /// Spawn a run in the background and hand back its handle.
    pub fn spawn(&self, request: ExportRequest, limits: ExportLimits) -> ExportHandle {
        let id = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(ExportStatus::Pending);
        let cancel = Arc::new(AtomicBool::new(false));

        let search = self.search.clone();
        let destination = self.destination.clone();
        let flag = cancel.clone();
        let join = tokio::spawn(async move {
            run_export(id, search, destination, request, limits, status_tx, flag).await
        });

        ExportHandle {
            id,
            status_rx,
            cancel,
            join,
        }
    }

    /// Run an export inline to completion.
    pub async fn run(&self, request: ExportRequest, limits: ExportLimits) -> ExportOutcome {
        let (status_tx, _status_rx) = watch::channel(ExportStatus::Pending);
        run_export(
            Uuid::new_v4(),
            self.search.clone(),
            self.destination.clone(),
            request,
            limits,
            status_tx,
            Arc::new(AtomicBool::new(false)),
        )
        .await
    }
}

/// Mutable run-scoped bookkeeping, owned by the coordinator.
struct RunState {
    entries_exported: u64,
    entries_available: Option<u64>,
    truncated: bool,
    batches_consumed: u64,
    search_started: DateTime<Utc>,
    search_ended: DateTime<Utc>,
    destination_location: Option<PathBuf>,
}

impl RunState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            entries_exported: 0,
            entries_available: None,
            truncated: false,
            batches_consumed: 0,
            search_started: now,
            search_ended: now,
            destination_location: None,
        }
    }
}

async fn run_export(
    id: Uuid,
    search: Arc<dyn SearchClient>,
    destination: Arc<dyn DestinationStore>,
    request: ExportRequest,
    limits: ExportLimits,
    status_tx: watch::Sender<ExportStatus>,
    cancel: Arc<AtomicBool>,
) -> ExportOutcome {
    let mut state = RunState::new();
    let result = execute(
        id,
        search,
        destination,
        &request,
        limits,
        &status_tx,
        &cancel,
        &mut state,
    )
    .await;

    let (status, error_kind) = match &result {
        Ok(_) => (ExportStatus::Succeeded, None),
        Err(ExportError::Cancelled) => (ExportStatus::Cancelled, None),
        Err(err) => (
            ExportStatus::Failed(err.kind().to_string()),
            Some(err.kind().to_string()),
        ),
    };

    match &result {
        Ok(location) => log::info!(
            "export {} succeeded: {} entries -> {}",
            id,
            state.entries_exported,
            location.display()
        ),
        Err(ExportError::Cancelled) => log::info!(
            "export {} cancelled after {} entries",
            id,
            state.entries_exported
        ),
        Err(err) => log::error!("export {} failed: {}", id, err),
    }

    let _ = status_tx.send(status.clone());

    ExportOutcome {
        run_id: id,
        status,
        entries_exported: state.entries_exported,
        entries_available: state.entries_available,
        truncated: state.truncated,
        error_kind,
        destination_location: state.destination_location,
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    id: Uuid,
    search: Arc<dyn SearchClient>,
    destination: Arc<dyn DestinationStore>,
    request: &ExportRequest,
    limits: ExportLimits,
    status_tx: &watch::Sender<ExportStatus>,
    cancel: &AtomicBool,
    state: &mut RunState,
) -> ExportResult<PathBuf> {
    // Config errors are reported before any batch is consumed.
    limits.validate()?;
    request.spec.validate()?;
    let projection = FieldProjection::from_spec(&request.spec)?;

    let _ = status_tx.send(ExportStatus::Running);
    log::info!(
        "export {} started: format={:?} page_size={} limit={}",
        id,
        request.format,
        request.spec.page_size,
        limits.max_entries_export_limit
    );

    let stem = &request.destination.file_stem;
    let data_name = format!("{}.{}", stem, request.format.file_extension());
    let data_target = destination.open(&data_name).await?;
    let data_staging = data_target.staging_path.clone();

    let writer =
        WriterFactory::create(request.format, &data_staging, projection.column_hint()).await?;
    let paginator =
        QueryPaginator::new(search, request.spec.clone(), limits.search_batch_timeout)?;

    let stats = match encode_batches(paginator, writer, &projection, limits, cancel, state).await
    {
        Ok(stats) => stats,
        Err(err) => {
            let _ = destination.discard(data_target).await;
            return Err(err);
        }
    };
    state.search_ended = Utc::now();

    if cancel.load(Ordering::SeqCst) {
        let _ = destination.discard(data_target).await;
        return Err(ExportError::Cancelled);
    }

    // Artifact metadata, written beside the data file (or into the bundle).
    let checksum = file_sha256(&data_staging).await?;
    let metadata = ExportArtifactMetadata {
        format: request.format,
        json_flavor: match request.format {
            ExportFormat::Json => Some("newline-delimited".to_string()),
            _ => None,
        },
        entries_exported: state.entries_exported,
        entries_available: state.entries_available,
        truncated: state.truncated,
        search_start_time: state.search_started,
        search_end_time: state.search_ended,
        stats,
        checksum_sha256: Some(checksum),
        schema_version: ARTIFACT_SCHEMA_VERSION,
    };
    let metadata_name = format!("{}.metadata.json", stem);
    let metadata_target = destination.open(&metadata_name).await?;
    tokio::fs::write(&metadata_target.staging_path, serde_json::to_vec_pretty(&metadata)?)
        .await?;

    let location = if request.zip_output {
        let zip_name = format!("{}.zip", stem);
        let zip_target = destination.open(&zip_name).await?;
        zip_files(
            &[
                (data_name.as_str(), data_staging.as_path()),
                (metadata_name.as_str(), metadata_target.staging_path.as_path()),
            ],
            &zip_target.staging_path,
        )
        .map_err(|e| ExportError::Internal(format!("zip packaging failed: {}", e)))?;

        let location = destination.commit(zip_target, &request.destination).await?;
        let _ = destination.discard(data_target).await;
        let _ = destination.discard(metadata_target).await;
        location
    } else {
        let location = destination.commit(data_target, &request.destination).await?;
        destination
            .commit(metadata_target, &request.destination)
            .await?;
        location
    };

    state.destination_location = Some(location.clone());
    Ok(location)
}

/// Pump batches from the paginator through projection into the encoder,
/// enforcing the entry cap and observing cancellation between batches.
async fn encode_batches(
    paginator: QueryPaginator,
    mut writer: Box<dyn TabularWriter>,
    projection: &FieldProjection,
    limits: ExportLimits,
    cancel: &AtomicBool,
    state: &mut RunState,
) -> ExportResult<ExportStats> {
    let mut batches = paginator.spawn_fetch();
    let limit = limits.max_entries_export_limit;

    while let Some(fetched) = batches.next().await {
        if cancel.load(Ordering::SeqCst) {
            return Err(ExportError::Cancelled);
        }
        let batch = fetched?;
        if let Some(total) = batch.total_available {
            state.entries_available = Some(total);
        }

        let mut records = batch.records;
        let remaining = limit.saturating_sub(state.entries_exported);
        if (records.len() as u64) > remaining {
            records.truncate(remaining as usize);
            state.truncated = true;
            log::warn!("export capped at the configured limit of {} entries", limit);
        }

        let projected = project_batch(records, projection).await?;
        let written = writer.write_batch(&projected).await?;
        state.entries_exported += written as u64;
        state.batches_consumed += 1;
        log::debug!(
            "batch {} encoded ({} entries so far)",
            state.batches_consumed,
            state.entries_exported
        );

        // Dropping the stream stops the fetch task at its next send.
        if state.truncated {
            break;
        }
    }

    writer.finalize().await
}

async fn file_sha256(path: &Path) -> ExportResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn zip_files(entries: &[(&str, &Path)], dest_zip: &Path) -> Result<(), String> {
    let file = std::fs::File::create(dest_zip).map_err(|e| e.to_string())?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, path) in entries {
        zip.start_file(*name, options).map_err(|e| e.to_string())?;
        let mut f = std::fs::File::open(path).map_err(|e| e.to_string())?;
        std::io::copy(&mut f, &mut zip).map_err(|e| e.to_string())?;
    }
    zip.finish().map_err(|e| e.to_string())?;
    Ok(())
}
