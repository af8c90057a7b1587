//! Command-line and environment configuration.
//!
//! Every option can also be set through a `WSI_INGEST_` environment variable:
//!
//! - `WSI_INGEST_API_KEY` - platform API key (second positional argument)
//! - `WSI_INGEST_LABEL_DEPTH` - directory depth of the label segment (default: 0)
//! - `WSI_INGEST_LABEL_MANIFEST` - JSON manifest of explicit labels
//! - `WSI_INGEST_CASE_METADATA` - JSON table of per-case concepts
//! - `WSI_INGEST_EXTENSIONS` - comma-separated slide extensions (default: svs,tif,tiff)
//! - `WSI_INGEST_WORKERS` - records processed concurrently (default: 4)
//! - `WSI_INGEST_ENDPOINT` - upload endpoint URL
//! - `WSI_INGEST_DRY_RUN` - skip the network
//!
//! plus the sizing and retry knobs listed by `--help`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::pipeline::{PipelineSettings, DEFAULT_WORKERS};
use crate::raster::DEFAULT_JPEG_QUALITY;
use crate::scan::{CaseMetadata, LabelStrategy, ManifestLabels, PathSegmentLabel, DEFAULT_EXTENSIONS};
use crate::slide::{Envelope, PlannerSettings};
use crate::upload::{self, ApiKey, RetryPolicy, DEFAULT_ENDPOINT};

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_LABEL_DEPTH: usize = 0;

pub const DEFAULT_ENVELOPE_EDGE: u32 = 4096;

/// Decoded bytes allowed for one extracted region, in MiB.
pub const DEFAULT_MEMORY_CEILING_MB: u64 = 512;

pub const DEFAULT_MIN_TILE_EDGE: u32 = 256;

pub const DEFAULT_MAX_ASSET_MB: u64 = upload::DEFAULT_MAX_ASSET_BYTES as u64 / MIB;

pub const DEFAULT_MAX_ATTEMPTS: u32 = upload::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_BASE_DELAY_MS: u64 = upload::DEFAULT_BASE_DELAY.as_millis() as u64;

pub const DEFAULT_MAX_DELAY_MS: u64 = upload::DEFAULT_MAX_DELAY.as_millis() as u64;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const MIB: u64 = 1024 * 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// wsi-ingest - convert whole slide images to labeled JPEGs and upload them.
///
/// Walks SLIDE_ROOT, labels each slide from its directory, extracts a region
/// that fits the output envelope (tiling when the slide is too large to
/// decode at once) and posts it to the annotation platform.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-ingest")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Directory tree containing the slides.
    #[arg(env = "WSI_INGEST_SLIDE_ROOT")]
    pub slide_root: PathBuf,

    /// API key for the annotation platform.
    #[arg(env = "WSI_INGEST_API_KEY", hide_env_values = true)]
    pub api_key: String,

    // =========================================================================
    // Scanning
    // =========================================================================
    /// Depth (below SLIDE_ROOT) of the directory that names the label.
    #[arg(long, default_value_t = DEFAULT_LABEL_DEPTH, env = "WSI_INGEST_LABEL_DEPTH")]
    pub label_depth: usize,

    /// JSON manifest mapping relative paths to labels; replaces directory labels.
    #[arg(long, env = "WSI_INGEST_LABEL_MANIFEST")]
    pub label_manifest: Option<PathBuf>,

    /// JSON table of cases whose sites, projects and cancer types become
    /// extra concepts of every slide of the case.
    #[arg(long, env = "WSI_INGEST_CASE_METADATA")]
    pub case_metadata: Option<PathBuf>,

    /// Slide file extensions (comma-separated, case-insensitive).
    #[arg(long, value_delimiter = ',', env = "WSI_INGEST_EXTENSIONS")]
    pub extensions: Option<Vec<String>>,

    // =========================================================================
    // Region planning and encoding
    // =========================================================================
    /// Maximum width of an uploaded image.
    #[arg(long, default_value_t = DEFAULT_ENVELOPE_EDGE, env = "WSI_INGEST_ENVELOPE_WIDTH")]
    pub envelope_width: u32,

    /// Maximum height of an uploaded image.
    #[arg(long, default_value_t = DEFAULT_ENVELOPE_EDGE, env = "WSI_INGEST_ENVELOPE_HEIGHT")]
    pub envelope_height: u32,

    /// Decoded memory allowed per extracted region, in MiB.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CEILING_MB, env = "WSI_INGEST_MEMORY_CEILING_MB")]
    pub memory_ceiling_mb: u64,

    /// Smallest tile edge when a slide has to be split.
    #[arg(long, default_value_t = DEFAULT_MIN_TILE_EDGE, env = "WSI_INGEST_MIN_TILE_EDGE")]
    pub min_tile_edge: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_INGEST_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Upload
    // =========================================================================
    /// Largest base64-encoded image sent to the platform, in MiB.
    #[arg(long, default_value_t = DEFAULT_MAX_ASSET_MB, env = "WSI_INGEST_MAX_ASSET_MB")]
    pub max_asset_mb: u64,

    /// Upload attempts per asset, including the first.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "WSI_INGEST_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BASE_DELAY_MS, env = "WSI_INGEST_BASE_DELAY_MS")]
    pub base_delay_ms: u64,

    /// Cap on the exponential retry delay in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS, env = "WSI_INGEST_MAX_DELAY_MS")]
    pub max_delay_ms: u64,

    /// Upload endpoint.
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "WSI_INGEST_ENDPOINT")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS, env = "WSI_INGEST_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Process slides without contacting the platform.
    #[arg(long, default_value_t = false, env = "WSI_INGEST_DRY_RUN")]
    pub dry_run: bool,

    // =========================================================================
    // Run
    // =========================================================================
    /// Slides processed concurrently.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "WSI_INGEST_WORKERS")]
    pub workers: usize,

    /// Write the run summary as JSON to this file.
    #[arg(long, env = "WSI_INGEST_SUMMARY_JSON")]
    pub summary_json: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.slide_root.as_os_str().is_empty() {
            return Err("SLIDE_ROOT is required".to_string());
        }

        if self.api_key.trim().is_empty() {
            return Err(
                "API key is empty. Pass it as the second argument or set WSI_INGEST_API_KEY"
                    .to_string(),
            );
        }

        if self.envelope_width == 0 || self.envelope_height == 0 {
            return Err("envelope width and height must be greater than 0".to_string());
        }

        if self.memory_ceiling_mb == 0 {
            return Err("memory_ceiling_mb must be greater than 0".to_string());
        }

        if self.min_tile_edge == 0 {
            return Err("min_tile_edge must be greater than 0".to_string());
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.max_asset_mb == 0 {
            return Err("max_asset_mb must be greater than 0".to_string());
        }

        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err("base_delay_ms must not exceed max_delay_ms".to_string());
        }

        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }

        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(format!("endpoint must be an http(s) URL, got {}", self.endpoint));
        }

        if let Some(extensions) = &self.extensions {
            if extensions.iter().all(|e| e.trim().trim_start_matches('.').is_empty()) {
                return Err("extensions must name at least one extension".to_string());
            }
        }

        Ok(())
    }

    pub fn api_key(&self) -> Result<ApiKey, String> {
        ApiKey::new(self.api_key.as_str())
    }

    pub fn extensions(&self) -> Vec<String> {
        match &self.extensions {
            Some(extensions) => extensions.clone(),
            None => DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Manifest labels when a manifest is configured, directory labels otherwise.
    pub fn label_strategy(&self) -> Result<Arc<dyn LabelStrategy>, String> {
        match &self.label_manifest {
            Some(path) => {
                let manifest = ManifestLabels::from_path(path)?;
                Ok(Arc::new(manifest))
            }
            None => Ok(Arc::new(PathSegmentLabel::new(self.label_depth))),
        }
    }

    pub fn case_metadata(&self) -> Result<Option<Arc<CaseMetadata>>, String> {
        self.case_metadata
            .as_ref()
            .map(|path| CaseMetadata::from_path(path).map(Arc::new))
            .transpose()
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.envelope_width, self.envelope_height)
    }

    pub fn planner_settings(&self) -> PlannerSettings {
        PlannerSettings {
            memory_ceiling: self.memory_ceiling_mb.saturating_mul(MIB),
            min_tile_edge: self.min_tile_edge,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            workers: self.workers,
            envelope: self.envelope(),
        }
    }

    pub fn max_asset_bytes(&self) -> usize {
        usize::try_from(self.max_asset_mb.saturating_mul(MIB)).unwrap_or(usize::MAX)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
