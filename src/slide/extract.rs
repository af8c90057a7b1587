//! Region extraction: fetch covering tiles, then decode, compose and scale.
//!
//! Tile bytes are read asynchronously; the CPU-bound part runs on the
//! blocking pool so decoding never stalls the runtime's I/O threads.

use std::borrow::Cow;

use bytes::Bytes;
use image::{GenericImageView, ImageFormat};

use super::handle::SlideHandle;
use super::region::{CropBox, Envelope, RegionRequest};
use crate::error::SlideError;
use crate::format::tiff::Compression;
use crate::io::RangeReader;
use crate::raster::{ChannelLayout, PixelBuffer};

/// Fill value for absent tiles (bright-field background).
const BACKGROUND: u8 = 255;

struct RawTile {
    tile_x: u32,
    tile_y: u32,
    data: Option<Bytes>,
}

/// Canvas of one region plus what is needed to draw tiles into it.
struct Composition {
    crop: CropBox,
    envelope: Envelope,
    tile_width: u32,
    tile_height: u32,
    compression: Compression,
    layout: ChannelLayout,
    canvas: Vec<u8>,
}

/// Extract the pixels of `request` from `handle`, scaled into its envelope.
///
/// Tiles are fetched one tile row at a time and drawn into the canvas before
/// the next row is read, so raw tile bytes never accumulate beyond a single
/// row next to the decoded region.
///
/// Any failure (I/O, corrupt tile, decode error) is reported as
/// [`SlideError::Unreadable`]; partially composed pixels are dropped.
pub async fn extract_region<R: RangeReader>(
    handle: &SlideHandle<R>,
    request: &RegionRequest,
) -> Result<PixelBuffer, SlideError> {
    let unreadable = |reason: String| SlideError::unreadable(handle.identifier(), reason);

    let level = handle
        .level_data(request.level)
        .ok_or_else(|| unreadable(format!("level {} does not exist", request.level)))?;
    let info = level.info;
    let crop = request.crop;
    if crop.width == 0
        || crop.height == 0
        || crop.right() > info.width
        || crop.bottom() > info.height
    {
        return Err(unreadable(format!(
            "crop {}x{}+{}+{} lies outside level {} ({}x{})",
            crop.width, crop.height, crop.x, crop.y, request.level, info.width, info.height
        )));
    }

    let layout = match level.compression {
        Compression::Jpeg if info.samples_per_pixel == 1 => ChannelLayout::Gray,
        Compression::Jpeg => ChannelLayout::Rgb,
        _ => ChannelLayout::from_channel_count(info.samples_per_pixel as u8)
            .map_err(|e| unreadable(e.to_string()))?,
    };

    let first_x = crop.x / info.tile_width;
    let last_x = (crop.right() - 1) / info.tile_width;
    let first_y = crop.y / info.tile_height;
    let last_y = (crop.bottom() - 1) / info.tile_height;

    let mut job = Composition::new(
        crop,
        request.envelope,
        (info.tile_width, info.tile_height),
        level.compression,
        layout,
    );
    for tile_y in first_y..=last_y {
        let mut row = Vec::with_capacity((last_x - first_x + 1) as usize);
        for tile_x in first_x..=last_x {
            let data = handle
                .read_tile(request.level, tile_x, tile_y)
                .await
                .map_err(|e| unreadable(e.to_string()))?;
            row.push(RawTile {
                tile_x,
                tile_y,
                data,
            });
        }

        job = tokio::task::spawn_blocking(move || job.draw(&row).map(|()| job))
            .await
            .map_err(|e| unreadable(format!("decode task failed: {e}")))?
            .map_err(unreadable)?;
    }

    tokio::task::spawn_blocking(move || job.finish())
        .await
        .map_err(|e| unreadable(format!("scale task failed: {e}")))?
        .map_err(unreadable)
}

impl Composition {
    fn new(
        crop: CropBox,
        envelope: Envelope,
        (tile_width, tile_height): (u32, u32),
        compression: Compression,
        layout: ChannelLayout,
    ) -> Self {
        let canvas = vec![BACKGROUND; crop.width as usize * crop.height as usize * layout.channels()];
        Self {
            crop,
            envelope,
            tile_width,
            tile_height,
            compression,
            layout,
            canvas,
        }
    }

    /// Decode `tiles` and copy their overlap with the crop into the canvas.
    /// Absent tiles leave the background in place.
    fn draw(&mut self, tiles: &[RawTile]) -> Result<(), String> {
        let channels = self.layout.channels();
        let crop = self.crop;

        for tile in tiles {
            let Some(data) = &tile.data else {
                continue;
            };

            let origin_x = tile.tile_x * self.tile_width;
            let origin_y = tile.tile_y * self.tile_height;
            let x0 = origin_x.max(crop.x);
            let y0 = origin_y.max(crop.y);
            let x1 = origin_x.saturating_add(self.tile_width).min(crop.right());
            let y1 = origin_y.saturating_add(self.tile_height).min(crop.bottom());
            if x0 >= x1 || y0 >= y1 {
                continue;
            }

            let (pixels, decoded_width, decoded_height) = decode_tile(data, self)?;
            if decoded_width < x1 - origin_x || decoded_height < y1 - origin_y {
                return Err(format!(
                    "tile ({}, {}) decoded to {}x{}, smaller than its footprint",
                    tile.tile_x, tile.tile_y, decoded_width, decoded_height
                ));
            }

            let row_len = (x1 - x0) as usize * channels;
            for y in y0..y1 {
                let src = ((y - origin_y) as usize * decoded_width as usize
                    + (x0 - origin_x) as usize)
                    * channels;
                let dst = ((y - crop.y) as usize * crop.width as usize + (x0 - crop.x) as usize)
                    * channels;
                self.canvas[dst..dst + row_len].copy_from_slice(&pixels[src..src + row_len]);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<PixelBuffer, String> {
        PixelBuffer::new(self.crop.width, self.crop.height, self.layout, self.canvas)
            .resize_to_fit(self.envelope.width, self.envelope.height)
            .map_err(|e| e.to_string())
    }
}

fn decode_tile<'a>(data: &'a [u8], job: &Composition) -> Result<(Cow<'a, [u8]>, u32, u32), String> {
    match job.compression {
        Compression::Jpeg => {
            let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|e| format!("JPEG tile decode failed: {e}"))?;
            let (width, height) = image.dimensions();
            let pixels = match job.layout {
                ChannelLayout::Gray => image.into_luma8().into_raw(),
                _ => image.into_rgb8().into_raw(),
            };
            Ok((Cow::Owned(pixels), width, height))
        }
        _ => {
            let expected =
                job.tile_width as usize * job.tile_height as usize * job.layout.channels();
            if data.len() < expected {
                return Err(format!(
                    "uncompressed tile holds {} bytes, expected {expected}",
                    data.len()
                ));
            }
            Ok((Cow::Borrowed(&data[..expected]), job.tile_width, job.tile_height))
        }
    }
}
