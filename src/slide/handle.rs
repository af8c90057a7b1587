//! An opened slide: pyramid geometry, vendor metadata and tile access.

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::tiff::{
    validate_pyramid, Compression, PyramidLevel, TiffPyramid, TileData, PHOTOMETRIC_RGB,
};
use crate::format::{detect_format, SlideFormat, SvsMetadata};
use crate::io::RangeReader;

/// Geometry of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelInfo {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Downsample relative to level 0
    pub downsample: f64,
    pub samples_per_pixel: u16,
}

impl LevelInfo {
    /// Decoded bytes per pixel used for memory accounting (at least RGB).
    pub fn bytes_per_pixel(&self) -> u64 {
        (self.samples_per_pixel as u64).max(3)
    }
}

impl From<&PyramidLevel> for LevelInfo {
    fn from(level: &PyramidLevel) -> Self {
        LevelInfo {
            width: level.width,
            height: level.height,
            tile_width: level.tile_width,
            tile_height: level.tile_height,
            tiles_x: level.tiles_x,
            tiles_y: level.tiles_y,
            downsample: level.downsample,
            samples_per_pixel: level.samples_per_pixel,
        }
    }
}

/// Everything needed to fetch and decode the tiles of one level.
#[derive(Debug, Clone)]
pub(crate) struct LevelData {
    pub(crate) info: LevelInfo,
    pub(crate) compression: Compression,
    pub(crate) photometric: Option<u16>,
    pub(crate) tiles: TileData,
}

/// An opened pyramidal slide.
///
/// Tile offsets and JPEG tables for every level are loaded up front; tile
/// pixels are read on demand through the underlying [`RangeReader`].
pub struct SlideHandle<R: RangeReader> {
    reader: R,
    format: SlideFormat,
    metadata: SvsMetadata,
    levels: Vec<LevelData>,
}

impl<R: RangeReader> SlideHandle<R> {
    /// Parse and validate the TIFF structure behind `reader`.
    pub async fn open(reader: R) -> Result<Self, TiffError> {
        let pyramid = TiffPyramid::parse(&reader).await?;
        let report = validate_pyramid(&pyramid)?;
        for warning in &report.warnings {
            debug!(slide = reader.identifier(), "{}", warning);
        }

        let description = pyramid.description(&reader).await?;
        let format = detect_format(description.as_deref());
        let metadata = match (&format, description.as_deref()) {
            (SlideFormat::AperioSvs, Some(text)) => SvsMetadata::parse(text),
            _ => SvsMetadata::default(),
        };

        let mut levels = Vec::with_capacity(pyramid.level_count());
        for level in &pyramid.levels {
            let tiles = TileData::load(&reader, &pyramid.header, level).await?;
            levels.push(LevelData {
                info: LevelInfo::from(level),
                compression: level.compression,
                photometric: level.photometric,
                tiles,
            });
        }

        debug!(
            slide = reader.identifier(),
            format = format.name(),
            levels = levels.len(),
            "Opened slide"
        );

        Ok(SlideHandle {
            reader,
            format,
            metadata,
            levels,
        })
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    pub fn format(&self) -> SlideFormat {
        self.format
    }

    pub fn metadata(&self) -> &SvsMetadata {
        &self.metadata
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> Vec<LevelInfo> {
        self.levels.iter().map(|l| l.info).collect()
    }

    pub fn level_info(&self, level: usize) -> Option<LevelInfo> {
        self.levels.get(level).map(|l| l.info)
    }

    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.level_info(level).map(|l| (l.width, l.height))
    }

    /// Level 0 dimensions.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.level_dimensions(0)
    }

    pub(crate) fn level_data(&self, level: usize) -> Option<&LevelData> {
        self.levels.get(level)
    }

    /// Read one tile, ready for its decoder.
    ///
    /// JPEG tiles come back as complete streams (tables merged, Adobe marker
    /// added for RGB samples). `None` means the tile is absent (zero byte
    /// count) and should be treated as background.
    pub async fn read_tile(
        &self,
        level: usize,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Option<Bytes>, TiffError> {
        let data = self.levels.get(level).ok_or(TiffError::InvalidTagValue {
            tag: "level",
            message: format!("level {level} out of range"),
        })?;
        if tile_x >= data.info.tiles_x || tile_y >= data.info.tiles_y {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!("tile ({tile_x}, {tile_y}) out of range on level {level}"),
            });
        }
        let index = tile_y as usize * data.info.tiles_x as usize + tile_x as usize;
        let (offset, length) = data.tiles.location(index).ok_or(TiffError::InvalidTagValue {
            tag: "TileOffsets",
            message: format!("no entry for tile index {index}"),
        })?;

        if length == 0 {
            return Ok(None);
        }
        let length = usize::try_from(length).map_err(|_| TiffError::InvalidTagValue {
            tag: "TileByteCounts",
            message: format!("tile of {length} bytes"),
        })?;
        let raw = self.reader.read_exact_at(offset, length).await?;

        let tile = match data.compression {
            Compression::Jpeg => prepare_tile_jpeg(
                data.tiles.jpeg_tables.as_deref(),
                &raw,
                data.photometric == Some(PHOTOMETRIC_RGB),
            ),
            _ => raw,
        };
        Ok(Some(tile))
    }
}
