//! End-to-end runs: scan a tree, read, encode and upload through a recording
//! transport.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use wsi_ingest::pipeline::{
    FailureReason, Orchestrator, OutcomeStatus, PipelineSettings, RunSummary, DEFAULT_ENVELOPE,
};
use wsi_ingest::raster::ImageEncoder;
use wsi_ingest::scan::{spawn_scan, ManifestScanner, PathSegmentLabel, DEFAULT_EXTENSIONS};
use wsi_ingest::slide::{Envelope, PlannerSettings, SlideReader};
use wsi_ingest::upload::{RetryPolicy, UploadClient, UploadResponse};

use super::test_utils::{api_key, pyramid, small_slide, write_file, RecordingTransport};

const CEILING: u64 = 64 * 1024 * 1024;

fn orchestrator(
    transport: Arc<RecordingTransport>,
    workers: usize,
    memory_ceiling: u64,
) -> Orchestrator {
    let reader = SlideReader::new(PlannerSettings {
        memory_ceiling,
        min_tile_edge: 64,
    });
    let client = UploadClient::new(
        transport,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        20 * 1024 * 1024,
    );
    Orchestrator::new(
        reader,
        ImageEncoder::new(85),
        client,
        api_key(),
        PipelineSettings {
            workers,
            envelope: DEFAULT_ENVELOPE,
        },
    )
}

/// Five readable slides and one that is not a TIFF at all.
fn slide_tree(root: &Path) {
    let slide = small_slide();
    write_file(root, "tumor/g1/TCGA-AA-0001-01Z-00-DX1.abc.svs", &slide);
    write_file(root, "tumor/g1/TCGA-AA-0002-01Z-00-DX1.def.svs", &slide);
    write_file(root, "tumor/g2/TCGA-AA-0003-01Z-00-DX1.svs", &slide);
    write_file(root, "normal/g1/TCGA-BB-0004-11A-00-DX1.tif", &slide);
    write_file(root, "normal/g3/TCGA-BB-0005-11A-00-DX1.tiff", &slide);
    write_file(root, "normal/g3/TCGA-BB-0006-11A-00-DX1.svs", b"definitely not a slide");
    write_file(root, "normal/g3/notes.txt", b"ignored");
}

fn scanner(root: &Path) -> ManifestScanner {
    ManifestScanner::new(root, Arc::new(PathSegmentLabel::new(0)), DEFAULT_EXTENSIONS)
}

async fn run_tree(orchestrator: &Orchestrator, root: &Path) -> RunSummary {
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let events = spawn_scan(scanner(root), 8);
    orchestrator.run(events, cancel_rx).await
}

fn outcome<'a>(summary: &'a RunSummary, id: &str) -> &'a wsi_ingest::pipeline::UploadOutcome {
    summary
        .outcomes
        .iter()
        .find(|o| o.record_id == id)
        .unwrap_or_else(|| panic!("no outcome for {id}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_end_to_end_run() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::accepting();
    let orchestrator = orchestrator(transport.clone(), 3, CEILING);

    let summary = run_tree(&orchestrator, dir.path()).await;

    assert_eq!(summary.total(), 6);
    assert_eq!(summary.done, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.scan_warnings, 1);
    assert!(!summary.aborted);
    assert!(!summary.cancelled);
    assert_eq!(transport.call_count(), 5);

    let broken = outcome(&summary, "TCGA-BB-0006-11A-00-DX1");
    assert!(matches!(
        broken.failure(),
        Some(FailureReason::UnreadableSlide { .. })
    ));
    assert_eq!(broken.attempts, 0);

    let uploaded = outcome(&summary, "TCGA-AA-0002-01Z-00-DX1");
    assert!(uploaded.is_uploaded());
    assert_eq!(uploaded.label, "tumor");
    assert_eq!(uploaded.tiles, 1);
    assert_eq!(outcome(&summary, "TCGA-BB-0004-11A-00-DX1").label, "normal");

    for call in transport.calls() {
        let label = call.metadata("label").unwrap();
        assert_eq!(call.concepts(), vec![label.as_str().unwrap().to_string()]);
    }
}

#[tokio::test]
async fn test_upload_metadata() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "tumor/site-7/TCGA-AA-0001-01Z-00-DX1.abc.svs",
        &small_slide(),
    );
    let transport = RecordingTransport::accepting();
    let summary = run_tree(&orchestrator(transport.clone(), 1, CEILING), dir.path()).await;
    assert_eq!(summary.done, 1);

    let call = &transport.calls()[0];
    assert_eq!(call.metadata("record_id"), Some(json!("TCGA-AA-0001-01Z-00-DX1")));
    assert_eq!(call.metadata("label"), Some(json!("tumor")));
    assert_eq!(call.metadata("source_id"), Some(json!("site-7")));
    assert_eq!(call.metadata("case_id"), Some(json!("TCGA-AA-0001")));
    assert_eq!(
        call.metadata("file_name"),
        Some(json!("TCGA-AA-0001-01Z-00-DX1.abc.svs"))
    );
    assert_eq!(call.metadata("format"), Some(json!("Generic Pyramidal TIFF")));
    assert_eq!(call.metadata("slide_width"), Some(json!(512)));
    assert_eq!(call.metadata("slide_height"), Some(json!(384)));
    assert_eq!(call.metadata("level"), Some(json!(0)));
    assert_eq!(call.metadata("tile_count"), Some(json!(1)));
}

#[tokio::test]
async fn test_large_slide_uploads_every_tile() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "tumor/big.tif",
        &pyramid(1024, 1024, 128, 1, &[90, 90, 200]),
    );
    let transport = RecordingTransport::accepting();
    let summary = run_tree(&orchestrator(transport.clone(), 2, 300 * 1024), dir.path()).await;

    assert_eq!(summary.done, 1);
    let big = outcome(&summary, "big");
    assert_eq!(big.tiles, 16);
    assert_eq!(transport.call_count(), 16);

    let mut indices: Vec<u64> = transport
        .calls()
        .iter()
        .map(|c| c.metadata("tile_index").unwrap().as_u64().unwrap())
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..16).collect::<Vec<_>>());
    assert!(transport
        .calls()
        .iter()
        .all(|c| c.metadata("tile_count") == Some(json!(16))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_run_skips_uploaded_records() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::accepting();
    let first = orchestrator(transport.clone(), 2, CEILING);
    let summary = run_tree(&first, dir.path()).await;
    assert_eq!(summary.done, 5);
    assert_eq!(first.dedup().len(), 5);

    // same orchestrator keeps its dedup set
    let again = run_tree(&first, dir.path()).await;
    assert_eq!(again.done, 0);
    assert_eq!(again.skipped, 5);
    assert_eq!(again.failed, 1);
    assert_eq!(transport.call_count(), 5);

    // a fresh orchestrator seeded with the carried set
    let fresh_transport = RecordingTransport::accepting();
    let fresh = orchestrator(fresh_transport.clone(), 2, CEILING).with_dedup(first.dedup());
    let third = run_tree(&fresh, dir.path()).await;
    assert_eq!(third.skipped, 5);
    assert_eq!(fresh_transport.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_ids_in_one_run() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "tumor/TCGA-AA-0001.first.svs", &small_slide());
    write_file(dir.path(), "normal/TCGA-AA-0001.second.svs", &small_slide());
    let transport = RecordingTransport::accepting();
    let summary = run_tree(&orchestrator(transport.clone(), 2, CEILING), dir.path()).await;

    assert_eq!(summary.done, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_copy_falls_back_to_next_copy() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "normal/TCGA-AA-0009.a.svs", b"corrupt");
    write_file(dir.path(), "tumor/TCGA-AA-0009.b.svs", &small_slide());
    let transport = RecordingTransport::accepting();
    let orchestrator = orchestrator(transport.clone(), 2, CEILING);
    let summary = run_tree(&orchestrator, dir.path()).await;

    assert_eq!(summary.done, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(transport.call_count(), 1);
    assert!(orchestrator.dedup().contains("TCGA-AA-0009"));

    let uploaded = summary.outcomes.iter().find(|o| o.is_uploaded()).unwrap();
    assert_eq!(uploaded.label, "tumor");
    assert!(matches!(
        summary.outcomes[0].failure(),
        Some(FailureReason::UnreadableSlide { .. })
    ));
}

#[tokio::test]
async fn test_rejected_credentials_abort_run() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::always(UploadResponse::Unauthorized {
        status: 401,
        message: "invalid api key".to_string(),
    });
    let summary = run_tree(&orchestrator(transport.clone(), 1, CEILING), dir.path()).await;

    assert!(summary.aborted);
    assert_eq!(summary.done, 0);
    assert_eq!(summary.total(), 6);
    assert_eq!(transport.call_count(), 1);

    let first = &summary.outcomes[0];
    assert!(matches!(
        first.failure(),
        Some(FailureReason::Upload { error }) if error.is_systemic()
    ));
    assert!(summary.outcomes[1..]
        .iter()
        .all(|o| o.failure() == Some(&FailureReason::Aborted)));
}

#[tokio::test]
async fn test_rejected_asset_does_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::scripted(vec![UploadResponse::Rejected {
        status: 400,
        message: "bad image".to_string(),
    }]);
    let summary = run_tree(&orchestrator(transport.clone(), 1, CEILING), dir.path()).await;

    assert!(!summary.aborted);
    assert_eq!(summary.done, 4);
    assert_eq!(summary.failed, 2);
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::accepting();
    let orchestrator = orchestrator(transport.clone(), 2, CEILING);
    let (records, _) = scanner(dir.path()).collect();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).unwrap();
    let summary = orchestrator.run_records(records, cancel_rx).await;

    assert!(summary.cancelled);
    assert_eq!(summary.not_dispatched, 6);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.status == OutcomeStatus::NotDispatched));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_mid_run_finishes_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    slide_tree(dir.path());
    let transport = RecordingTransport::slow(Duration::from_millis(200));
    let orchestrator = orchestrator(transport.clone(), 1, CEILING);
    let (records, _) = scanner(dir.path()).collect();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let observer = transport.clone();
    tokio::spawn(async move {
        while observer.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = cancel_tx.send(true);
        // keep the sender alive until the run is over
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    let summary = orchestrator.run_records(records, cancel_rx).await;

    assert!(summary.cancelled);
    assert_eq!(summary.done, 1);
    assert_eq!(summary.total(), 6);
    assert_eq!(summary.done + summary.not_dispatched, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let slide = small_slide();
    for i in 0..8 {
        write_file(dir.path(), &format!("tumor/slide-{i}.svs"), &slide);
    }
    let transport = RecordingTransport::slow(Duration::from_millis(40));
    let summary = run_tree(&orchestrator(transport.clone(), 2, CEILING), dir.path()).await;

    assert_eq!(summary.done, 8);
    assert!(transport.peak_concurrency() <= 2);
    assert!(transport.peak_concurrency() >= 1);
}

#[tokio::test]
async fn test_small_envelope_downscales() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "tumor/slide.svs", &small_slide());
    let transport = RecordingTransport::accepting();
    let reader = SlideReader::new(PlannerSettings {
        memory_ceiling: CEILING,
        min_tile_edge: 64,
    });
    let client = UploadClient::new(transport.clone(), RetryPolicy::default(), 1 << 20);
    let orchestrator = Orchestrator::new(
        reader,
        ImageEncoder::new(85),
        client,
        api_key(),
        PipelineSettings {
            workers: 1,
            envelope: Envelope::new(200, 200),
        },
    );

    let summary = run_tree(&orchestrator, dir.path()).await;
    assert_eq!(summary.done, 1);
    // the second level (256x192) is the smallest that still covers 200x200
    assert_eq!(transport.calls()[0].metadata("level"), Some(json!(1)));
}
