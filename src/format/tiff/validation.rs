//! Checks that a parsed pyramid can be decoded by the extractor.
//!
//! Hard failures become [`TiffError`]s; oddities that decoding survives are
//! returned as warnings for the caller to log.

use super::pyramid::{PyramidLevel, TiffPyramid};
use super::tags::{Compression, PLANAR_CHUNKY};
use crate::error::TiffError;

/// Non-fatal findings from [`validate_pyramid`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validate every pyramid level.
///
/// A file with no pyramid levels fails with `StripOrganization` when it has
/// stripped images (a flat TIFF) and `NoPyramidLevels` otherwise.
pub fn validate_pyramid(pyramid: &TiffPyramid) -> Result<ValidationReport, TiffError> {
    if pyramid.levels.is_empty() {
        if pyramid.ifds.iter().any(|ifd| ifd.is_stripped()) {
            return Err(TiffError::StripOrganization);
        }
        return Err(TiffError::NoPyramidLevels);
    }

    let mut report = ValidationReport::default();
    for (index, level) in pyramid.levels.iter().enumerate() {
        validate_level(index, level, &mut report)?;
    }
    Ok(report)
}

fn validate_level(
    index: usize,
    level: &PyramidLevel,
    report: &mut ValidationReport,
) -> Result<(), TiffError> {
    if !level.compression.is_supported() {
        return Err(TiffError::UnsupportedCompression(level.compression.name()));
    }

    if let Some(planar) = level.planar_configuration {
        if planar != PLANAR_CHUNKY && level.samples_per_pixel > 1 {
            return Err(TiffError::InvalidTagValue {
                tag: "PlanarConfiguration",
                message: format!("level {index}: separate planes are not supported"),
            });
        }
    }

    let samples_ok = match level.compression {
        Compression::Jpeg => matches!(level.samples_per_pixel, 1 | 3),
        _ => (1..=4).contains(&level.samples_per_pixel),
    };
    if !samples_ok {
        return Err(TiffError::InvalidTagValue {
            tag: "SamplesPerPixel",
            message: format!(
                "level {index}: {} samples with {} compression",
                level.samples_per_pixel,
                level.compression.name()
            ),
        });
    }

    if level.compression == Compression::Jpeg && !level.has_jpeg_tables() {
        report.warnings.push(format!(
            "level {index}: JPEG tiles without JPEGTables; tiles must be self-contained"
        ));
    }

    if level.tile_width % 16 != 0 || level.tile_height % 16 != 0 {
        report.warnings.push(format!(
            "level {index}: tile size {}x{} is not a multiple of 16",
            level.tile_width, level.tile_height
        ));
    }

    Ok(())
}
