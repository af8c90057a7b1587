//! Label inference strategies.
//!
//! A strategy maps a slide's path relative to the scan root to a label and,
//! optionally, extra concepts.

use std::collections::HashMap;
use std::path::{Component, Path};

use serde::Deserialize;

/// The label and extra concepts assigned to one slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labeling {
    pub label: String,
    pub concepts: Vec<String>,
}

impl Labeling {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            concepts: Vec::new(),
        }
    }
}

/// Resolves the label of a slide from its path relative to the scan root.
///
/// `Err` carries a short human-readable reason; the scanner turns it into a
/// `NoLabel` warning.
pub trait LabelStrategy: Send + Sync {
    fn label_for(&self, relative_path: &Path) -> Result<Labeling, String>;

    /// Identifier of the slide's source folder, when the layout has one.
    fn source_id(&self, _relative_path: &Path) -> Option<String> {
        None
    }
}

/// Directory names of `relative_path`, excluding the file name.
fn directory_segments(relative_path: &Path) -> Result<Vec<&str>, String> {
    let mut segments = Vec::new();
    for component in relative_path.parent().into_iter().flat_map(Path::components) {
        if let Component::Normal(name) = component {
            let name = name
                .to_str()
                .ok_or_else(|| "directory name is not valid UTF-8".to_string())?;
            segments.push(name);
        }
    }
    Ok(segments)
}

/// `<root>/<seg 0>/<seg 1>/.../<file>`: the label is the segment at `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathSegmentLabel {
    pub depth: usize,
}

impl PathSegmentLabel {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }
}

impl LabelStrategy for PathSegmentLabel {
    fn label_for(&self, relative_path: &Path) -> Result<Labeling, String> {
        let segments = directory_segments(relative_path)?;
        match segments.get(self.depth) {
            Some(label) if !label.trim().is_empty() => Ok(Labeling::new(label.trim())),
            _ => Err(format!("no directory at depth {}", self.depth)),
        }
    }

    fn source_id(&self, relative_path: &Path) -> Option<String> {
        segment_after(relative_path, self.depth)
    }
}

/// Directory segment right after the label one, if any.
///
/// In a `<label>/<source id>/<file>` layout this is the source identifier.
pub fn segment_after(relative_path: &Path, depth: usize) -> Option<String> {
    directory_segments(relative_path)
        .ok()?
        .get(depth + 1)
        .map(|s| s.to_string())
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: String,
    label: String,
    #[serde(default)]
    concepts: Vec<String>,
}

/// Explicit labels loaded from a JSON manifest:
///
/// ```json
/// [{ "path": "tumor/a.svs", "label": "tumor", "concepts": ["lung"] }]
/// ```
///
/// Paths are relative to the scan root and use `/` separators.
#[derive(Debug, Clone, Default)]
pub struct ManifestLabels {
    entries: HashMap<String, Labeling>,
}

impl ManifestLabels {
    pub fn from_json(json: &str) -> Result<Self, String> {
        let parsed: Vec<ManifestEntry> =
            serde_json::from_str(json).map_err(|e| format!("invalid label manifest: {e}"))?;

        let mut entries = HashMap::with_capacity(parsed.len());
        for entry in parsed {
            if entry.label.trim().is_empty() {
                return Err(format!("empty label for {}", entry.path));
            }
            let key = normalize_key(Path::new(&entry.path));
            let labeling = Labeling {
                label: entry.label.trim().to_string(),
                concepts: entry.concepts,
            };
            if entries.insert(key, labeling).is_some() {
                return Err(format!("duplicate manifest path {}", entry.path));
            }
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read label manifest {}: {e}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LabelStrategy for ManifestLabels {
    fn label_for(&self, relative_path: &Path) -> Result<Labeling, String> {
        self.entries
            .get(&normalize_key(relative_path))
            .cloned()
            .ok_or_else(|| "path not listed in label manifest".to_string())
    }
}

fn normalize_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
