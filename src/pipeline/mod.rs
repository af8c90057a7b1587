//! Runs scanned records through the slide reader, the encoder and the upload
//! client under a bounded worker pool, and summarizes the outcome.

mod orchestrator;
mod state;
mod worker;

pub use orchestrator::{Orchestrator, PipelineSettings, DEFAULT_ENVELOPE, DEFAULT_WORKERS};
pub use state::{
    DedupSet, FailureReason, OutcomeStatus, RecordState, RunSummary, UploadOutcome,
};
pub use worker::WorkerEvent;
