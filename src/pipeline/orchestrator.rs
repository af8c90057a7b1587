//! Bounded-concurrency dispatch of records to workers.
//!
//! ```text
//! scan events ──► dispatcher ──(permit)──► worker tasks
//!                     ▲                         │
//!                     │      WorkerEvent mpsc   │
//!                     └──── collector ◄─────────┘
//!                          (RunState mutex)
//! ```
//!
//! The dispatcher acquires a pool permit before pulling the next record, so
//! at most `workers` slides are decoded at once. Workers report transitions
//! and their outcome over a channel; the collector is the only code that
//! writes run state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::state::{DedupSet, FailureReason, OutcomeStatus, RunState, RunSummary, UploadOutcome};
use super::worker::{Worker, WorkerEvent};
use crate::raster::ImageEncoder;
use crate::scan::{ScanEvent, SlideRecord};
use crate::slide::{Envelope, SlideReader};
use crate::upload::{ApiKey, UploadClient};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_ENVELOPE: Envelope = Envelope::new(4096, 4096);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Concurrent records; bounds decoded memory
    pub workers: usize,
    /// Largest uploaded raster
    pub envelope: Envelope,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            envelope: DEFAULT_ENVELOPE,
        }
    }
}

/// Runs records through read → encode → upload with a bounded worker pool.
pub struct Orchestrator {
    worker: Arc<Worker>,
    settings: PipelineSettings,
    state: Arc<Mutex<RunState>>,
}

impl Orchestrator {
    pub fn new(
        reader: SlideReader,
        encoder: ImageEncoder,
        client: UploadClient,
        api_key: ApiKey,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                reader,
                encoder,
                client,
                api_key,
                envelope: settings.envelope,
            }),
            settings,
            state: Arc::new(Mutex::new(RunState::default())),
        }
    }

    /// Start from ids uploaded by an earlier run.
    pub fn with_dedup(self, dedup: DedupSet) -> Self {
        *lock(&self.state) = RunState::with_dedup(dedup);
        self
    }

    /// Ids uploaded so far, across every run of this orchestrator.
    pub fn dedup(&self) -> DedupSet {
        lock(&self.state).dedup.clone()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process a fixed list of records.
    pub async fn run_records(
        &self,
        records: Vec<SlideRecord>,
        cancel: watch::Receiver<bool>,
    ) -> RunSummary {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            // capacity covers every record
            let _ = tx.try_send(ScanEvent::Record(record));
        }
        drop(tx);
        self.run(rx, cancel).await
    }

    /// Process records as the scanner produces them.
    ///
    /// Returns once every dispatched record has reached `Done` or `Failed`.
    /// Setting `cancel` to true stops dispatch; records still queued are
    /// reported as not dispatched. A credential rejection stops dispatch too,
    /// and every remaining record fails as `Aborted`.
    ///
    /// A record whose id is still being processed waits for that copy. It is
    /// skipped once the copy uploads and processed in its place if the copy
    /// fails.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ScanEvent>,
        mut cancel: watch::Receiver<bool>,
    ) -> RunSummary {
        lock(&self.state).reset();

        let workers = self.settings.workers.max(1);
        let pool = Arc::new(Semaphore::new(workers));
        let (event_tx, event_rx) = mpsc::channel(workers * 4);
        let collector = tokio::spawn(collect(self.state.clone(), event_rx));
        let mut tasks = JoinSet::new();
        let mut cancelled = false;

        info!(workers = workers, envelope = %self.settings.envelope, "Starting run");

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancellation(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                permit = pool.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if lock(&self.state).halted {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = cancellation(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                event = events.recv() => event,
            };

            let record = match event {
                None => break,
                Some(ScanEvent::Warning(warning)) => {
                    warn!("Scan warning: {}", warning);
                    lock(&self.state).scan_warnings += 1;
                    continue;
                }
                Some(ScanEvent::Record(record)) => record,
            };

            let slot = {
                let mut state = lock(&self.state);
                let slot = state.admit();
                if state.is_uploaded(&record.id) {
                    debug!(record = %record.id, "Skipping duplicate");
                    state.settle(
                        slot,
                        UploadOutcome::unprocessed(&record, OutcomeStatus::SkippedDuplicate),
                    );
                    continue;
                }
                if state.halted {
                    state.settle(
                        slot,
                        UploadOutcome::unprocessed(
                            &record,
                            OutcomeStatus::Failed {
                                reason: FailureReason::Aborted,
                            },
                        ),
                    );
                    break;
                }
                if state.is_in_flight(&record.id) {
                    debug!(record = %record.id, "Waiting for another copy of this record");
                    state.park(slot, record);
                    continue;
                }
                state.dispatch(slot, &record.id);
                slot
            };

            let worker = self.worker.clone();
            let events = event_tx.clone();
            tasks.spawn(async move {
                let mut current = Some((slot, record));
                while let Some((slot, record)) = current.take() {
                    let outcome = worker.process(slot, &record, &events).await;
                    let (next, reply) = oneshot::channel();
                    if events
                        .send(WorkerEvent::Finished {
                            slot,
                            outcome,
                            next,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    current = reply.await.ok().flatten();
                }
                drop(permit);
            });
        }

        if cancelled {
            lock(&self.state).cancelled = true;
        }

        let halted = lock(&self.state).halted;
        if halted {
            warn!("Credential rejected; aborting remaining records");
            while let Some(event) = events.recv().await {
                self.drain_one(event, OutcomeStatus::Failed {
                    reason: FailureReason::Aborted,
                });
            }
        } else if cancelled {
            warn!("Run cancelled; waiting for in-flight records");
            events.close();
            while let Some(event) = events.recv().await {
                self.drain_one(event, OutcomeStatus::NotDispatched);
            }
        }

        drop(event_tx);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }
        if let Err(e) = collector.await {
            error!("Event collector failed: {}", e);
        }

        let mut summary = self.summarize();
        summary.cancelled = cancelled;
        info!(
            done = summary.done,
            failed = summary.failed,
            skipped = summary.skipped,
            not_dispatched = summary.not_dispatched,
            scan_warnings = summary.scan_warnings,
            "Run finished"
        );
        summary
    }

    fn drain_one(&self, event: ScanEvent, status: OutcomeStatus) {
        let mut state = lock(&self.state);
        match event {
            ScanEvent::Warning(warning) => {
                warn!("Scan warning: {}", warning);
                state.scan_warnings += 1;
            }
            ScanEvent::Record(record) => {
                let slot = state.admit();
                let status = if state.is_uploaded(&record.id) {
                    OutcomeStatus::SkippedDuplicate
                } else {
                    status.clone()
                };
                state.settle(slot, UploadOutcome::unprocessed(&record, status));
            }
        }
    }

    fn summarize(&self) -> RunSummary {
        let mut state = lock(&self.state);
        let outcomes: Vec<UploadOutcome> = std::mem::take(&mut state.outcomes)
            .into_iter()
            .enumerate()
            .map(|(slot, outcome)| {
                outcome.unwrap_or_else(|| UploadOutcome {
                    record_id: format!("slot-{slot}"),
                    label: String::new(),
                    path: String::new(),
                    status: OutcomeStatus::Failed {
                        reason: FailureReason::Worker {
                            message: "worker ended without reporting an outcome".to_string(),
                        },
                    },
                    attempts: 0,
                    tiles: 0,
                })
            })
            .collect();
        state.abandon_parked();
        let mut summary = RunSummary::from_outcomes(outcomes, state.scan_warnings);
        summary.aborted = state.halted;
        summary
    }
}

/// Applies worker events to the run state until every sender is gone.
async fn collect(state: Arc<Mutex<RunState>>, mut events: mpsc::Receiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Transition { slot, state: next } => {
                if !lock(&state).transition(slot, next) {
                    warn!(slot = slot, to = ?next, "Ignoring illegal state transition");
                }
            }
            WorkerEvent::Finished {
                slot,
                outcome,
                next,
            } => {
                match outcome.failure() {
                    None => info!(
                        record = %outcome.record_id,
                        label = %outcome.label,
                        tiles = outcome.tiles,
                        attempts = outcome.attempts,
                        "Uploaded"
                    ),
                    Some(reason) => warn!(
                        record = %outcome.record_id,
                        label = %outcome.label,
                        attempts = outcome.attempts,
                        "Failed: {}",
                        reason
                    ),
                }
                let systemic = matches!(
                    outcome.failure(),
                    Some(FailureReason::Upload { error }) if error.is_systemic()
                );
                let handoff = {
                    let mut guard = lock(&state);
                    if systemic {
                        guard.halted = true;
                    }
                    guard.finish(slot, outcome)
                };
                if let Some((_, record)) = &handoff {
                    info!(
                        record = %record.id,
                        path = %record.relative_path.display(),
                        "Processing another copy of a failed record"
                    );
                }
                if let Err(Some((slot, record))) = next.send(handoff) {
                    let status = OutcomeStatus::Failed {
                        reason: FailureReason::Worker {
                            message: "worker exited before taking over".to_string(),
                        },
                    };
                    lock(&state).settle(slot, UploadOutcome::unprocessed(&record, status));
                }
            }
        }
    }
}

/// Resolves once `cancel` reads true. Pends forever if the sender is gone.
async fn cancellation(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
