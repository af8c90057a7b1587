//! Directory walking and record construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use walkdir::{DirEntry, FilterEntry, WalkDir};

use super::case_metadata::CaseMetadata;
use super::label::LabelStrategy;
use crate::error::ScanWarning;

/// Extensions scanned when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["svs", "tif", "tiff"];

/// Path-derived metadata carried with a record into the upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Folder right below the label folder (a download id in GDC layouts)
    pub source_id: Option<String>,
    /// First three dash-separated parts of the record id (a TCGA case barcode)
    pub case_id: Option<String>,
}

/// One slide found by the scanner, with its label. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideRecord {
    /// Deduplication key: the file name up to its first `.`
    pub id: String,
    pub path: PathBuf,
    /// Path relative to the scan root
    pub relative_path: PathBuf,
    pub label: String,
    pub concepts: Vec<String>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Record(SlideRecord),
    Warning(ScanWarning),
}

impl From<SlideRecord> for ScanEvent {
    fn from(record: SlideRecord) -> Self {
        ScanEvent::Record(record)
    }
}

/// Walks a slide root and yields labeled records.
#[derive(Clone)]
pub struct ManifestScanner {
    root: PathBuf,
    strategy: Arc<dyn LabelStrategy>,
    extensions: Vec<String>,
    cases: Option<Arc<CaseMetadata>>,
}

impl ManifestScanner {
    /// `extensions` are matched case-insensitively; a leading `.` is ignored.
    pub fn new<I, S>(root: impl Into<PathBuf>, strategy: Arc<dyn LabelStrategy>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self {
            root: root.into(),
            strategy,
            extensions,
            cases: None,
        }
    }

    /// Add the concepts of each record's case, looked up by case id.
    pub fn with_case_metadata(mut self, cases: Arc<CaseMetadata>) -> Self {
        self.cases = Some(cases);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the root. Entries are visited in file-name order, so two
    /// scans of an unchanged tree produce identical event sequences.
    pub fn scan(&self) -> ScanIter {
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible as fn(&DirEntry) -> bool);
        ScanIter {
            walker,
            scanner: self.clone(),
        }
    }

    /// Drain a full scan into records and warnings.
    pub fn collect(&self) -> (Vec<SlideRecord>, Vec<ScanWarning>) {
        let mut records = Vec::new();
        let mut warnings = Vec::new();
        for event in self.scan() {
            match event {
                ScanEvent::Record(record) => records.push(record),
                ScanEvent::Warning(warning) => warnings.push(warning),
            }
        }
        (records, warnings)
    }

    fn classify(&self, path: &Path) -> ScanEvent {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let display = relative.display().to_string();

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if !extension.is_some_and(|e| self.extensions.contains(&e)) {
            return ScanEvent::Warning(ScanWarning::UnrecognizedExtension { path: display });
        }

        let Some(id) = path.file_name().and_then(|n| n.to_str()).map(record_id) else {
            return ScanEvent::Warning(ScanWarning::Unreadable {
                path: display,
                message: "file name is not valid UTF-8".to_string(),
            });
        };

        let labeling = match self.strategy.label_for(relative) {
            Ok(labeling) => labeling,
            Err(reason) => {
                return ScanEvent::Warning(ScanWarning::NoLabel {
                    path: display,
                    reason,
                })
            }
        };

        let metadata = RecordMetadata {
            source_id: self.strategy.source_id(relative),
            case_id: case_id(&id),
        };

        let mut concepts = labeling.concepts;
        if let (Some(cases), Some(case)) = (&self.cases, &metadata.case_id) {
            for concept in cases.concepts_for(case) {
                if !concepts.contains(concept) {
                    concepts.push(concept.clone());
                }
            }
        }

        ScanEvent::Record(SlideRecord {
            id,
            path: path.to_path_buf(),
            relative_path: relative.to_path_buf(),
            label: labeling.label,
            concepts,
            metadata,
        })
    }
}

/// Iterator returned by [`ManifestScanner::scan`].
pub struct ScanIter {
    walker: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
    scanner: ManifestScanner,
}

impl Iterator for ScanIter {
    type Item = ScanEvent;

    fn next(&mut self) -> Option<ScanEvent> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(ScanEvent::Warning(walk_warning(&self.scanner.root, err))),
            };
            if entry.file_type().is_file() {
                return Some(self.scanner.classify(entry.path()));
            }
        }
    }
}

/// Run a scan on the blocking pool, feeding events through a bounded channel.
///
/// The walk pauses whenever `buffer` events are waiting, and stops once the
/// receiver is dropped or closed.
pub fn spawn_scan(scanner: ManifestScanner, buffer: usize) -> mpsc::Receiver<ScanEvent> {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    tokio::task::spawn_blocking(move || {
        for event in scanner.scan() {
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
    rx
}

fn is_visible(entry: &DirEntry) -> bool {
    entry.depth() == 0
        || !entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn walk_warning(root: &Path, err: walkdir::Error) -> ScanWarning {
    let path = err
        .path()
        .map(|p| p.strip_prefix(root).unwrap_or(p).display().to_string())
        .unwrap_or_else(|| root.display().to_string());
    if err.loop_ancestor().is_some() {
        ScanWarning::SymlinkLoop { path }
    } else {
        ScanWarning::Unreadable {
            path,
            message: err.to_string(),
        }
    }
}

/// File name up to its first `.`.
pub fn record_id(file_name: &str) -> String {
    match file_name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => file_name.to_string(),
    }
}

/// First three `-`-separated parts of an id, if it has at least three.
pub fn case_id(record_id: &str) -> Option<String> {
    let parts: Vec<&str> = record_id.splitn(4, '-').take(3).collect();
    (parts.len() == 3 && parts.iter().all(|p| !p.is_empty())).then(|| parts.join("-"))
}
