//! Extra concepts looked up by case id.
//!
//! A case table describes each patient case once; every slide whose record
//! id starts with that case barcode inherits its concepts. Multi-valued
//! fields hold `;`-separated values and each value becomes its own concept.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CaseEntry {
    case_id: String,
    #[serde(default)]
    primary_site: Option<String>,
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    tcga_cancer_type: Option<String>,
}

/// Concepts per case id, loaded from a JSON array:
///
/// ```json
/// [{ "case_id": "TCGA-05-4244", "primary_site": "Bronchus and lung",
///    "project_name": "Lung Adenocarcinoma", "tcga_cancer_type": "LUAD" }]
/// ```
#[derive(Debug, Clone, Default)]
pub struct CaseMetadata {
    cases: HashMap<String, Vec<String>>,
}

impl CaseMetadata {
    pub fn from_json(json: &str) -> Result<Self, String> {
        let parsed: Vec<CaseEntry> =
            serde_json::from_str(json).map_err(|e| format!("invalid case metadata: {e}"))?;

        let mut cases = HashMap::with_capacity(parsed.len());
        for entry in parsed {
            let case_id = entry.case_id.trim().to_string();
            if case_id.is_empty() {
                return Err("case metadata entry with an empty case_id".to_string());
            }
            // concept order: site, project, cancer type
            let fields = [entry.primary_site, entry.project_name, entry.tcga_cancer_type];
            let mut concepts: Vec<String> = Vec::new();
            for value in fields.iter().flatten().flat_map(|v| split_values(v)) {
                if !concepts.contains(&value) {
                    concepts.push(value);
                }
            }
            if cases.insert(case_id.clone(), concepts).is_some() {
                return Err(format!("duplicate case {case_id} in case metadata"));
            }
        }
        Ok(Self { cases })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read case metadata {}: {e}", path.display()))?;
        Self::from_json(&json)
    }

    /// Concepts of a case. Unknown cases have none.
    pub fn concepts_for(&self, case_id: &str) -> &[String] {
        self.cases.get(case_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// `"Lung; Bronchus;"` → `["Lung", "Bronchus"]`
fn split_values(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
