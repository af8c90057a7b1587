//! Pyramid level identification.
//!
//! A slide file holds the resolution pyramid plus auxiliary images (label,
//! macro, thumbnail). Levels are the tiled IFDs whose dimensions shrink from
//! the largest one by a consistent, roughly power-of-two factor on both axes.
//! Auxiliary images are either stripped or have their own aspect ratio, so
//! they fall out of that test.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

/// Stop following the IFD chain after this many directories.
const MAX_IFDS: usize = 64;

/// Allowed disagreement between the horizontal and vertical downsample.
const ASPECT_TOLERANCE: f64 = 0.05;

/// Allowed distance of a downsample from the nearest power of two.
const POWER_OF_TWO_TOLERANCE: f64 = 0.2;

// =============================================================================
// PyramidLevel
// =============================================================================

/// One resolution level of the pyramid.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Position of the source IFD in the file's chain
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Downsample relative to level 0 (1.0 for level 0)
    pub downsample: f64,
    pub compression: Compression,
    pub samples_per_pixel: u16,
    pub photometric: Option<u16>,
    pub planar_configuration: Option<u16>,
    tile_offsets: IfdEntry,
    tile_byte_counts: IfdEntry,
    jpeg_tables: Option<IfdEntry>,
}

impl PyramidLevel {
    fn from_ifd(ifd: &Ifd, ifd_index: usize, header: &TiffHeader) -> Option<Self> {
        if !ifd.is_tiled() {
            return None;
        }

        let order = header.byte_order;
        let width = ifd.required_u32(TiffTag::ImageWidth, order).ok()?;
        let height = ifd.required_u32(TiffTag::ImageLength, order).ok()?;
        let tile_width = ifd.required_u32(TiffTag::TileWidth, order).ok()?;
        let tile_height = ifd.required_u32(TiffTag::TileLength, order).ok()?;
        if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
            return None;
        }

        // TIFF defaults: no compression, one sample per pixel
        let compression = ifd
            .scalar(TiffTag::Compression, order)
            .map(|v| Compression::from_u16(v as u16))
            .unwrap_or(Compression::None);
        let samples_per_pixel = ifd
            .scalar(TiffTag::SamplesPerPixel, order)
            .map(|v| v as u16)
            .unwrap_or(1);

        Some(PyramidLevel {
            ifd_index,
            width,
            height,
            tile_width,
            tile_height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            compression,
            samples_per_pixel,
            photometric: ifd
                .scalar(TiffTag::PhotometricInterpretation, order)
                .map(|v| v as u16),
            planar_configuration: ifd
                .scalar(TiffTag::PlanarConfiguration, order)
                .map(|v| v as u16),
            tile_offsets: ifd.entry(TiffTag::TileOffsets)?.clone(),
            tile_byte_counts: ifd.entry(TiffTag::TileByteCounts)?.clone(),
            jpeg_tables: ifd.entry(TiffTag::JpegTables).cloned(),
        })
    }

    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Row-major index of a tile, if it lies inside the grid.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }

    pub fn has_jpeg_tables(&self) -> bool {
        self.jpeg_tables.is_some()
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// All IFDs of a file plus the subset that forms the pyramid.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    /// Every IFD in chain order
    pub ifds: Vec<Ifd>,
    /// Pyramid levels, level 0 (largest) first
    pub levels: Vec<PyramidLevel>,
}

impl TiffPyramid {
    /// Read the header and IFD chain of `reader` and identify the pyramid.
    ///
    /// An empty `levels` is not an error here; validation decides how to
    /// report it.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = read_ifd_chain(reader, &header).await?;
        let levels = identify_levels(&ifds, &header);
        debug!(
            source = reader.identifier(),
            ifds = ifds.len(),
            levels = levels.len(),
            bigtiff = header.is_bigtiff,
            "Parsed TIFF structure"
        );

        Ok(TiffPyramid {
            header,
            ifds,
            levels,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// ImageDescription of the first IFD, where vendors put slide metadata.
    pub async fn description<R: RangeReader>(
        &self,
        reader: &R,
    ) -> Result<Option<String>, TiffError> {
        let Some(entry) = self
            .ifds
            .first()
            .and_then(|ifd| ifd.entry(TiffTag::ImageDescription))
        else {
            return Ok(None);
        };
        let text = ValueReader::new(reader, &self.header)
            .read_ascii(entry)
            .await?;
        Ok(Some(text))
    }
}

async fn read_ifd_chain<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut visited = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 && ifds.len() < MAX_IFDS {
        if !visited.insert(offset) {
            debug!(offset, "IFD chain loops back; stopping");
            break;
        }
        if offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader
            .read_exact_at(offset, header.ifd_count_size())
            .await?;
        let entry_count = header.read_entry_count(&count_bytes)?;
        let ifd_size = header.ifd_size(entry_count) as usize;
        let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
        let ifd = Ifd::parse(&ifd_bytes, header)?;

        offset = ifd.next_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

pub(crate) fn identify_levels(ifds: &[Ifd], header: &TiffHeader) -> Vec<PyramidLevel> {
    let mut candidates: Vec<PyramidLevel> = ifds
        .iter()
        .enumerate()
        .filter_map(|(index, ifd)| PyramidLevel::from_ifd(ifd, index, header))
        .collect();

    // Largest first; chain order breaks ties so the result is deterministic
    candidates.sort_by(|a, b| {
        b.area()
            .cmp(&a.area())
            .then(a.ifd_index.cmp(&b.ifd_index))
    });

    let Some(base) = candidates.first() else {
        return Vec::new();
    };
    let (base_width, base_height) = (base.width as f64, base.height as f64);

    let mut levels: Vec<PyramidLevel> = Vec::new();
    for mut level in candidates {
        let downsample_x = base_width / level.width as f64;
        let downsample_y = base_height / level.height as f64;
        let downsample = (downsample_x + downsample_y) / 2.0;

        if (downsample_x - downsample_y).abs() / downsample > ASPECT_TOLERANCE {
            continue;
        }
        if !levels.is_empty() && !is_power_of_two_like(downsample) {
            continue;
        }
        if let Some(previous) = levels.last() {
            if downsample <= previous.downsample * (1.0 + ASPECT_TOLERANCE) {
                continue;
            }
        }

        level.downsample = downsample;
        levels.push(level);
    }

    levels
}

fn is_power_of_two_like(downsample: f64) -> bool {
    let exponent = downsample.log2().round();
    if exponent < 1.0 {
        return false;
    }
    let ratio = downsample / 2f64.powf(exponent);
    (1.0 - POWER_OF_TWO_TOLERANCE..=1.0 + POWER_OF_TWO_TOLERANCE).contains(&ratio)
}

// =============================================================================
// TileData
// =============================================================================

/// Tile locations and shared JPEG tables of one level.
#[derive(Debug, Clone)]
pub struct TileData {
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TileData {
    pub async fn load<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        level: &PyramidLevel,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);

        let offsets = values
            .read_integers(&level.tile_offsets, TiffTag::TileOffsets.name())
            .await?;
        let byte_counts = values
            .read_integers(&level.tile_byte_counts, TiffTag::TileByteCounts.name())
            .await?;

        let expected = level.tile_count();
        for (tag, found) in [
            (TiffTag::TileOffsets, offsets.len()),
            (TiffTag::TileByteCounts, byte_counts.len()),
        ] {
            if (found as u64) < expected {
                return Err(TiffError::InvalidTagValue {
                    tag: tag.name(),
                    message: format!("{found} entries for {expected} tiles"),
                });
            }
        }

        let jpeg_tables = match &level.jpeg_tables {
            Some(entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        Ok(TileData {
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// File offset and length of a tile; `None` when the index is out of range.
    pub fn location(&self, index: usize) -> Option<(u64, u64)> {
        Some((*self.offsets.get(index)?, *self.byte_counts.get(index)?))
    }
}
