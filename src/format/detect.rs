//! Slide format detection.
//!
//! Both supported formats are TIFF containers; Aperio files are told apart by
//! the vendor marker at the start of the first ImageDescription.

/// Marker Aperio writes at the start of ImageDescription.
const APERIO_MARKER: &str = "Aperio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    /// Aperio SVS: abbreviated JPEG tiles plus a pipe-separated metadata block
    AperioSvs,
    GenericTiff,
}

impl SlideFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic Pyramidal TIFF",
        }
    }
}

/// Classify a TIFF slide from its first ImageDescription.
pub fn detect_format(description: Option<&str>) -> SlideFormat {
    match description {
        Some(text) if text.contains(APERIO_MARKER) => SlideFormat::AperioSvs,
        _ => SlideFormat::GenericTiff,
    }
}

/// Quick check for TIFF (`II*\0`, `MM\0*`) or BigTIFF (`II+\0`, `MM\0+`) magic.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(..4),
        Some([0x49, 0x49, 0x2A | 0x2B, 0x00]) | Some([0x4D, 0x4D, 0x00, 0x2A | 0x2B])
    )
}
