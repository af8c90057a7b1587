//! Per-record state, outcomes and the run summary.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::error::{EncodeError, SlideError, UploadError};
use crate::scan::SlideRecord;

/// Lifecycle of one record inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Reading,
    Encoding,
    Uploading,
    Done,
    Failed,
}

impl RecordState {
    /// Legal moves. `Uploading -> Reading` starts the next tile of a tiled
    /// record; every non-terminal state may fail.
    pub fn can_transition_to(self, next: RecordState) -> bool {
        use RecordState::*;
        match (self, next) {
            (Pending, Reading)
            | (Reading, Encoding)
            | (Encoding, Uploading)
            | (Uploading, Reading)
            | (Uploading, Done) => true,
            (Pending | Reading | Encoding | Uploading, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Done | RecordState::Failed)
    }
}

/// Why a record failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    UnreadableSlide { message: String },
    Encoding { message: String },
    Upload { error: UploadError },
    /// Never dispatched because a credential rejection stopped the run
    Aborted,
    /// The worker task ended without reporting an outcome
    Worker { message: String },
}

impl From<SlideError> for FailureReason {
    fn from(err: SlideError) -> Self {
        FailureReason::UnreadableSlide {
            message: err.to_string(),
        }
    }
}

impl From<EncodeError> for FailureReason {
    fn from(err: EncodeError) -> Self {
        FailureReason::Encoding {
            message: err.to_string(),
        }
    }
}

impl From<UploadError> for FailureReason {
    fn from(error: UploadError) -> Self {
        FailureReason::Upload { error }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnreadableSlide { message } => write!(f, "unreadable slide: {message}"),
            FailureReason::Encoding { message } => write!(f, "encoding error: {message}"),
            FailureReason::Upload { error } => write!(f, "upload failed: {error}"),
            FailureReason::Aborted => f.write_str("aborted after credential rejection"),
            FailureReason::Worker { message } => write!(f, "worker failure: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Uploaded,
    SkippedDuplicate,
    Failed { reason: FailureReason },
    /// Still queued when the run was cancelled
    NotDispatched,
}

/// Final word on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub record_id: String,
    pub label: String,
    pub path: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Upload posts across all tiles, retries included
    pub attempts: u32,
    /// Tiles accepted by the platform
    pub tiles: u32,
}

impl UploadOutcome {
    /// Outcome of a record that never reached a worker.
    pub fn unprocessed(record: &SlideRecord, status: OutcomeStatus) -> Self {
        UploadOutcome {
            record_id: record.id.clone(),
            label: record.label.clone(),
            path: record.relative_path.display().to_string(),
            status,
            attempts: 0,
            tiles: 0,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == OutcomeStatus::Uploaded
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.status {
            OutcomeStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Record ids already uploaded. Carry it into the next run to skip them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupSet {
    ids: HashSet<String>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for DedupSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_dispatched: usize,
    pub scan_warnings: usize,
    /// Dispatch stopped after a credential rejection
    pub aborted: bool,
    pub cancelled: bool,
    /// One entry per record, in the order records were received
    pub outcomes: Vec<UploadOutcome>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: Vec<UploadOutcome>, scan_warnings: usize) -> Self {
        let mut summary = RunSummary {
            scan_warnings,
            ..Default::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                OutcomeStatus::Uploaded => summary.done += 1,
                OutcomeStatus::SkippedDuplicate => summary.skipped += 1,
                OutcomeStatus::Failed { .. } => summary.failed += 1,
                OutcomeStatus::NotDispatched => summary.not_dispatched += 1,
            }
        }
        summary.outcomes = outcomes;
        summary
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// `(record id, reason)` for every failed record.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &FailureReason)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.failure().map(|reason| (o.record_id.as_str(), reason)))
    }

    pub fn failure_reasons(&self) -> Vec<String> {
        self.failures()
            .map(|(id, reason)| format!("{id}: {reason}"))
            .collect()
    }
}

/// Everything the orchestrator mutates during a run, kept behind one lock.
/// A record that shares its id with one still being processed. It waits
/// for that copy's outcome.
pub(crate) type Parked = (usize, SlideRecord);

#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub dedup: DedupSet,
    /// Ids of dispatched records without an outcome yet
    pub in_flight: HashSet<String>,
    /// Later copies of an in-flight id, in arrival order
    pub parked: HashMap<String, VecDeque<Parked>>,
    pub states: HashMap<usize, RecordState>,
    /// Indexed by dispatch slot
    pub outcomes: Vec<Option<UploadOutcome>>,
    pub scan_warnings: usize,
    pub halted: bool,
    pub cancelled: bool,
}

impl RunState {
    pub fn with_dedup(dedup: DedupSet) -> Self {
        Self {
            dedup,
            ..Default::default()
        }
    }

    /// Clear per-run fields, keeping the dedup set.
    pub fn reset(&mut self) {
        let dedup = std::mem::take(&mut self.dedup);
        *self = Self::with_dedup(dedup);
    }

    pub fn is_uploaded(&self, id: &str) -> bool {
        self.dedup.contains(id)
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains(id)
    }

    /// Reserve an outcome slot.
    pub fn admit(&mut self) -> usize {
        self.outcomes.push(None);
        self.outcomes.len() - 1
    }

    pub fn dispatch(&mut self, slot: usize, id: &str) {
        self.in_flight.insert(id.to_string());
        self.states.insert(slot, RecordState::Pending);
    }

    /// Hold a record until the in-flight copy of its id settles.
    pub fn park(&mut self, slot: usize, record: SlideRecord) {
        self.states.insert(slot, RecordState::Pending);
        self.parked
            .entry(record.id.clone())
            .or_default()
            .push_back((slot, record));
    }

    /// Apply a transition, returning false when it is not legal.
    pub fn transition(&mut self, slot: usize, next: RecordState) -> bool {
        let current = self
            .states
            .get(&slot)
            .copied()
            .unwrap_or(RecordState::Pending);
        if !current.can_transition_to(next) {
            return false;
        }
        self.states.insert(slot, next);
        true
    }

    /// Store the outcome of a record. In-flight bookkeeping is untouched.
    pub fn settle(&mut self, slot: usize, outcome: UploadOutcome) {
        let terminal = match outcome.status {
            OutcomeStatus::Uploaded => Some(RecordState::Done),
            OutcomeStatus::Failed { .. } => Some(RecordState::Failed),
            _ => None,
        };
        if let Some(state) = terminal {
            self.states.insert(slot, state);
        }
        if outcome.is_uploaded() {
            self.dedup.insert(outcome.record_id.clone());
        }
        if let Some(entry) = self.outcomes.get_mut(slot) {
            *entry = Some(outcome);
        }
    }

    /// Settle a worker's outcome and resolve the copies parked behind it.
    ///
    /// After an upload the parked copies are duplicates. After a failure the
    /// oldest parked copy is returned for processing and the id stays in
    /// flight, unless the run is halted or cancelled.
    pub fn finish(&mut self, slot: usize, outcome: UploadOutcome) -> Option<Parked> {
        let id = outcome.record_id.clone();
        let uploaded = outcome.is_uploaded();
        self.settle(slot, outcome);

        let mut waiting = self.parked.remove(&id).unwrap_or_default();
        if !uploaded && !self.halted && !self.cancelled {
            if let Some(next) = waiting.pop_front() {
                if !waiting.is_empty() {
                    self.parked.insert(id, waiting);
                }
                return Some(next);
            }
        }

        self.in_flight.remove(&id);
        let status = if uploaded {
            OutcomeStatus::SkippedDuplicate
        } else if self.halted {
            OutcomeStatus::Failed {
                reason: FailureReason::Aborted,
            }
        } else {
            OutcomeStatus::NotDispatched
        };
        for (slot, record) in waiting {
            self.settle(slot, UploadOutcome::unprocessed(&record, status.clone()));
        }
        None
    }

    /// Settle records left parked after their worker vanished.
    pub fn abandon_parked(&mut self) {
        let parked: Vec<Parked> = self.parked.drain().flat_map(|(_, queue)| queue).collect();
        for (slot, record) in parked {
            let status = OutcomeStatus::Failed {
                reason: FailureReason::Worker {
                    message: "an earlier copy of this record never finished".to_string(),
                },
            };
            self.settle(slot, UploadOutcome::unprocessed(&record, status));
        }
        self.in_flight.clear();
    }
}
