//! Aperio ImageDescription metadata.
//!
//! The description looks like
//!
//! ```text
//! Aperio Image Library v12.0.5
//! 46000x32914 [0,100 46000x32814] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.4990|...
//! ```
//!
//! i.e. a free-text head followed by pipe-separated `key = value` pairs.

use std::collections::BTreeMap;

/// Slide-level metadata parsed from an Aperio description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SvsMetadata {
    /// Microns per pixel at level 0
    pub mpp: Option<f64>,
    /// Objective magnification (AppMag)
    pub magnification: Option<f64>,
    pub vendor: Option<String>,
    /// Every `key = value` pair, sorted by key
    pub properties: BTreeMap<String, String>,
}

impl SvsMetadata {
    pub fn parse(description: &str) -> Self {
        let mut metadata = SvsMetadata::default();
        if description.contains("Aperio") {
            metadata.vendor = Some("Aperio".to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                continue;
            }

            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.magnification = value.parse().ok(),
                _ => {}
            }
            metadata
                .properties
                .insert(key.to_string(), value.to_string());
        }

        metadata
    }
}
