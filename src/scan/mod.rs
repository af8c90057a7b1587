//! Slide discovery: walk a directory tree, match slide extensions and attach
//! a label to each file through a pluggable [`LabelStrategy`].

mod case_metadata;
mod label;
mod scanner;

pub use case_metadata::CaseMetadata;
pub use label::{segment_after, LabelStrategy, Labeling, ManifestLabels, PathSegmentLabel};
pub use scanner::{
    case_id, record_id, spawn_scan, ManifestScanner, RecordMetadata, ScanEvent, ScanIter,
    SlideRecord, DEFAULT_EXTENSIONS,
};
