//! Processing of a single record: read, plan, extract, encode, upload.

use std::path::Path;

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::state::{FailureReason, OutcomeStatus, RecordState, UploadOutcome};
use crate::io::RangeReader;
use crate::raster::ImageEncoder;
use crate::scan::SlideRecord;
use crate::slide::{Envelope, RegionPlan, RegionRequest, SlideHandle, SlideReader};
use crate::upload::{ApiKey, UploadClient, UploadContext};

/// Messages from workers to the orchestrator.
#[derive(Debug)]
pub enum WorkerEvent {
    Transition {
        slot: usize,
        state: RecordState,
    },
    /// Final outcome of one record. The worker keeps its pool permit until
    /// `next` answers: either a parked copy of the same id to process
    /// instead, or `None` once the outcome has been applied.
    Finished {
        slot: usize,
        outcome: UploadOutcome,
        next: oneshot::Sender<Option<(usize, SlideRecord)>>,
    },
}

/// Shared, read-only collaborators of every worker.
pub(crate) struct Worker {
    pub reader: SlideReader,
    pub encoder: ImageEncoder,
    pub client: UploadClient,
    pub api_key: ApiKey,
    pub envelope: Envelope,
}

/// Running totals for one record.
#[derive(Default)]
struct Progress {
    attempts: u32,
    tiles: u32,
}

impl Worker {
    pub async fn process(
        &self,
        slot: usize,
        record: &SlideRecord,
        events: &mpsc::Sender<WorkerEvent>,
    ) -> UploadOutcome {
        let mut progress = Progress::default();
        let status = match self.run(slot, record, events, &mut progress).await {
            Ok(()) => OutcomeStatus::Uploaded,
            Err(reason) => OutcomeStatus::Failed { reason },
        };
        UploadOutcome {
            record_id: record.id.clone(),
            label: record.label.clone(),
            path: record.relative_path.display().to_string(),
            status,
            attempts: progress.attempts,
            tiles: progress.tiles,
        }
    }

    async fn run(
        &self,
        slot: usize,
        record: &SlideRecord,
        events: &mpsc::Sender<WorkerEvent>,
        progress: &mut Progress,
    ) -> Result<(), FailureReason> {
        transition(events, slot, RecordState::Reading).await;
        let handle = self.reader.open(&record.path).await?;
        let plan = self.reader.select_region(&handle, self.envelope)?;
        let requests = plan.requests();
        debug!(
            record = %record.id,
            dimensions = ?handle.dimensions(),
            level = plan.level(),
            tiles = requests.len(),
            "Processing slide"
        );

        let base = base_metadata(record, &handle, &plan);
        let tile_count = requests.len();

        for (index, request) in requests.iter().enumerate() {
            if index > 0 {
                transition(events, slot, RecordState::Reading).await;
            }
            let buffer = self.reader.extract(&handle, request).await?;
            transition(events, slot, RecordState::Encoding).await;

            let encoder = self.encoder;
            let asset = tokio::task::spawn_blocking(move || encoder.encode(buffer))
                .await
                .map_err(|e| FailureReason::Worker {
                    message: format!("encoder task failed: {e}"),
                })??;

            transition(events, slot, RecordState::Uploading).await;
            let context = UploadContext {
                record_id: record.id.clone(),
                label: record.label.clone(),
                concepts: record.concepts.clone(),
                metadata: tile_metadata(&base, request, index, tile_count),
            };
            let report = self.client.upload(&asset, &context, &self.api_key).await;
            progress.attempts += report.attempts;
            report.result?;
            progress.tiles += 1;
        }

        Ok(())
    }
}

async fn transition(events: &mpsc::Sender<WorkerEvent>, slot: usize, state: RecordState) {
    // the collector outlives every worker, so a failed send is only possible
    // during teardown
    let _ = events.send(WorkerEvent::Transition { slot, state }).await;
}

fn base_metadata<R: RangeReader>(
    record: &SlideRecord,
    handle: &SlideHandle<R>,
    plan: &RegionPlan,
) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("record_id".into(), json!(record.id));
    metadata.insert("label".into(), json!(record.label));
    if let Some(name) = record.path.file_name().and_then(|n| n.to_str()) {
        metadata.insert("file_name".into(), json!(name));
    }
    metadata.insert("relative_path".into(), json!(path_string(&record.relative_path)));
    if let Some(source_id) = &record.metadata.source_id {
        metadata.insert("source_id".into(), json!(source_id));
    }
    if let Some(case_id) = &record.metadata.case_id {
        metadata.insert("case_id".into(), json!(case_id));
    }
    metadata.insert("format".into(), json!(handle.format().name()));
    if let Some((width, height)) = handle.dimensions() {
        metadata.insert("slide_width".into(), json!(width));
        metadata.insert("slide_height".into(), json!(height));
    }
    let slide = handle.metadata();
    if let Some(mpp) = slide.mpp {
        metadata.insert("mpp".into(), json!(mpp));
    }
    if let Some(magnification) = slide.magnification {
        metadata.insert("magnification".into(), json!(magnification));
    }
    metadata.insert("level".into(), json!(plan.level()));
    metadata
}

fn tile_metadata(
    base: &Map<String, Value>,
    request: &RegionRequest,
    index: usize,
    count: usize,
) -> Map<String, Value> {
    let mut metadata = base.clone();
    metadata.insert("tile_index".into(), json!(index));
    metadata.insert("tile_count".into(), json!(count));
    metadata.insert("crop".into(), json!(request.crop));
    metadata
}

fn path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
