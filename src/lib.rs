//! # wsi-ingest
//!
//! Converts whole slide images (Aperio SVS and pyramidal TIFF) into labeled
//! JPEG assets and uploads them to an annotation platform.
//!
//! Slides are far too large to decode at full resolution, so each one is
//! opened through its TIFF pyramid: the smallest level that still covers the
//! output envelope is chosen, and when even that level would not fit the
//! memory ceiling it is split into a deterministic grid of tiles.
//!
//! ## Architecture
//!
//! - [`scan`] - directory walking and label inference
//! - [`io`] - positioned reads over files and memory
//! - [`mod@format`] - TIFF/SVS parsing and JPEG stream fix-ups
//! - [`slide`] - slide handles, region planning and extraction
//! - [`raster`] - pixel buffers and JPEG encoding
//! - [`upload`] - platform client with retry and backoff
//! - [`pipeline`] - bounded worker pool, dedup and run summary
//! - [`config`] - CLI and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::watch;
//! use wsi_ingest::{
//!     DryRunTransport, ImageEncoder, ManifestScanner, Orchestrator, PathSegmentLabel,
//!     PipelineSettings, PlannerSettings, RetryPolicy, SlideReader, UploadClient, ApiKey,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let scanner = ManifestScanner::new("/data/slides", Arc::new(PathSegmentLabel::new(0)), ["svs"]);
//!     let (records, _warnings) = scanner.collect();
//!
//!     let client = UploadClient::new(Arc::new(DryRunTransport::new()), RetryPolicy::default(), 20 << 20);
//!     let orchestrator = Orchestrator::new(
//!         SlideReader::new(PlannerSettings { memory_ceiling: 512 << 20, min_tile_edge: 256 }),
//!         ImageEncoder::default(),
//!         client,
//!         ApiKey::new("key").unwrap(),
//!         PipelineSettings::default(),
//!     );
//!
//!     let (_cancel, cancel_rx) = watch::channel(false);
//!     let summary = orchestrator.run_records(records, cancel_rx).await;
//!     println!("{} uploaded, {} failed", summary.done, summary.failed);
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod raster;
pub mod scan;
pub mod slide;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::{EncodeError, IoError, ScanWarning, SlideError, TiffError, UploadError};
pub use format::{detect_format, SlideFormat, SvsMetadata};
pub use io::{FileRangeReader, MemoryRangeReader, RangeReader};
pub use pipeline::{
    DedupSet, FailureReason, Orchestrator, OutcomeStatus, PipelineSettings, RecordState,
    RunSummary, UploadOutcome,
};
pub use raster::{ChannelLayout, EncodedAsset, ImageEncoder, PixelBuffer};
pub use scan::{
    spawn_scan, LabelStrategy, ManifestLabels, ManifestScanner, PathSegmentLabel, ScanEvent,
    SlideRecord,
};
pub use slide::{
    Envelope, LevelInfo, PlannerSettings, RegionPlan, RegionRequest, SlideHandle, SlideReader,
};
pub use upload::{
    ApiKey, DryRunTransport, HttpTransport, RetryPolicy, Transport, UploadClient, UploadContext,
    UploadReport, UploadResponse,
};
