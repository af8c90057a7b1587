//! wsi-ingest - convert whole slide images and upload them for annotation.
//!
//! This binary wires configuration, scanning, the pipeline and logging.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_ingest::{
    config::Config,
    pipeline::{Orchestrator, RunSummary},
    raster::ImageEncoder,
    scan::{spawn_scan, ManifestScanner},
    slide::SlideReader,
    upload::{DryRunTransport, HttpTransport, Transport, UploadClient},
};

/// Scan events buffered ahead of the dispatcher.
const SCAN_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Errors here mean the run could not start; per-record failures end up in
/// the summary instead.
async fn run(config: Config) -> Result<(), String> {
    let metadata = tokio::fs::metadata(&config.slide_root)
        .await
        .map_err(|e| format!("Cannot read slide root {}: {}", config.slide_root.display(), e))?;
    if !metadata.is_dir() {
        return Err(format!(
            "Slide root {} is not a directory",
            config.slide_root.display()
        ));
    }

    let api_key = config.api_key()?;
    let strategy = config
        .label_strategy()
        .map_err(|e| format!("Cannot load label manifest: {}", e))?;
    let cases = config.case_metadata()?;

    let transport: Arc<dyn Transport> = if config.dry_run {
        Arc::new(DryRunTransport::new())
    } else {
        Arc::new(
            HttpTransport::new(config.endpoint.clone(), config.request_timeout())
                .map_err(|e| format!("Cannot build HTTP client: {}", e))?,
        )
    };

    info!("Configuration:");
    info!("  Slide root: {}", config.slide_root.display());
    match &config.label_manifest {
        Some(path) => info!("  Labels: manifest {}", path.display()),
        None => info!("  Labels: directory at depth {}", config.label_depth),
    }
    if let (Some(path), Some(cases)) = (&config.case_metadata, &cases) {
        info!("  Case metadata: {} ({} cases)", path.display(), cases.len());
    }
    info!("  Extensions: {}", config.extensions().join(","));
    info!(
        "  Envelope: {}, memory ceiling {} MiB, min tile edge {}",
        config.envelope(),
        config.memory_ceiling_mb,
        config.min_tile_edge
    );
    info!("  Workers: {}", config.workers);
    if config.dry_run {
        warn!("  Dry run: nothing will be uploaded");
    } else {
        info!("  Endpoint: {}", config.endpoint);
    }

    let mut scanner = ManifestScanner::new(&config.slide_root, strategy, config.extensions());
    if let Some(cases) = cases {
        scanner = scanner.with_case_metadata(cases);
    }
    let client = UploadClient::new(transport, config.retry_policy(), config.max_asset_bytes());
    let orchestrator = Orchestrator::new(
        SlideReader::new(config.planner_settings()),
        ImageEncoder::new(config.jpeg_quality),
        client,
        api_key,
        config.pipeline_settings(),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight slides");
            let _ = cancel_tx.send(true);
        }
    });

    let events = spawn_scan(scanner, SCAN_BUFFER);
    let summary = orchestrator.run(events, cancel_rx).await;

    report(&summary);
    if let Some(path) = &config.summary_json {
        write_summary(path, &summary).await;
    }
    Ok(())
}

fn report(summary: &RunSummary) {
    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Uploaded:          {}", summary.done);
    info!("  Failed:            {}", summary.failed);
    info!("  Skipped duplicate: {}", summary.skipped);
    if summary.not_dispatched > 0 {
        info!("  Not dispatched:    {}", summary.not_dispatched);
    }
    info!("  Scan warnings:     {}", summary.scan_warnings);
    if summary.aborted {
        warn!("  Run aborted after the platform rejected the API key");
    }
    for reason in summary.failure_reasons() {
        warn!("  {}", reason);
    }
    info!("────────────────────────────────────────────────────────────────");
}

/// A summary that cannot be written is logged, not fatal: the run itself
/// already completed.
async fn write_summary(path: &std::path::Path, summary: &RunSummary) {
    let json = match serde_json::to_vec_pretty(summary) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize summary: {}", e);
            return;
        }
    };
    match tokio::fs::write(path, json).await {
        Ok(()) => info!("Summary written to {}", path.display()),
        Err(e) => error!("Failed to write summary to {}: {}", path.display(), e),
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_ingest=debug"
    } else {
        "wsi_ingest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
