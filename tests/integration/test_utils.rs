//! Shared fixtures: pyramidal TIFF builders, slide trees and stub transports.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tokio::time::Instant;

use wsi_ingest::upload::{ApiKey, PostInputsRequest, Transport, UploadResponse};

// =============================================================================
// TIFF Builder
// =============================================================================

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_IMAGE_DESCRIPTION: u16 = 270;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_PLANAR_CONFIGURATION: u16 = 284;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_JPEG_TABLES: u16 = 347;

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;
const TYPE_LONG8: u16 = 16;

/// One pyramid level: geometry plus the bytes of every tile, row-major.
/// An empty tile is written with a zero byte count.
#[derive(Clone)]
pub struct LevelSpec {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub compression: u16,
    pub samples: u16,
    pub photometric: u16,
    pub tiles: Vec<Vec<u8>>,
    pub jpeg_tables: Option<Vec<u8>>,
}

impl LevelSpec {
    /// Uncompressed level filled with one pixel value (1 to 4 samples).
    pub fn raw(width: u32, height: u32, tile: u32, pixel: &[u8]) -> Self {
        let count = (width.div_ceil(tile) * height.div_ceil(tile)) as usize;
        let tile_bytes: Vec<u8> = pixel
            .iter()
            .copied()
            .cycle()
            .take((tile * tile) as usize * pixel.len())
            .collect();
        LevelSpec {
            width,
            height,
            tile_width: tile,
            tile_height: tile,
            compression: 1,
            samples: pixel.len() as u16,
            photometric: if pixel.len() >= 3 { 2 } else { 1 },
            tiles: vec![tile_bytes; count],
            jpeg_tables: None,
        }
    }

    /// JPEG level whose tiles are all one solid color.
    pub fn jpeg(width: u32, height: u32, tile: u32, color: [u8; 3]) -> Self {
        let count = (width.div_ceil(tile) * height.div_ceil(tile)) as usize;
        LevelSpec {
            width,
            height,
            tile_width: tile,
            tile_height: tile,
            compression: 7,
            samples: 3,
            photometric: 6,
            tiles: vec![solid_jpeg(tile, tile, color); count],
            jpeg_tables: None,
        }
    }

    pub fn with_compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    pub fn without_tile(mut self, index: usize) -> Self {
        self.tiles[index].clear();
        self
    }
}

/// Writes classic or BigTIFF files, one IFD per level.
#[derive(Default)]
pub struct SlideBuilder {
    levels: Vec<LevelSpec>,
    description: Option<String>,
    big_endian: bool,
    bigtiff: bool,
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    data: Vec<u8>,
}

impl SlideBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    /// ImageDescription of the first IFD.
    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        if self.bigtiff {
            out.extend(self.encode(43, 2));
            out.extend(self.encode(8, 2));
            out.extend(self.encode(0, 2));
            out.extend(self.encode(16, 8));
        } else {
            out.extend(self.encode(42, 2));
            out.extend(self.encode(8, 4));
        }

        let (count_size, entry_size, offset_width) = if self.bigtiff {
            (8u64, 20u64, 8usize)
        } else {
            (2, 12, 4)
        };
        let offset_type = if self.bigtiff { TYPE_LONG8 } else { TYPE_LONG };

        for (index, level) in self.levels.iter().enumerate() {
            let mut entries = self.entries(index, level, offset_type);
            let ifd_offset = out.len() as u64;
            let ifd_size = count_size + entries.len() as u64 * entry_size + offset_width as u64;
            let base = ifd_offset + ifd_size;

            let mut blob = Vec::new();
            let mut offsets = Vec::with_capacity(level.tiles.len() * offset_width);
            let mut counts = Vec::with_capacity(level.tiles.len() * offset_width);
            for tile in &level.tiles {
                if tile.is_empty() {
                    offsets.extend(self.encode(0, offset_width));
                    counts.extend(self.encode(0, offset_width));
                } else {
                    offsets.extend(self.encode(base + blob.len() as u64, offset_width));
                    counts.extend(self.encode(tile.len() as u64, offset_width));
                    blob.extend_from_slice(tile);
                }
            }
            for entry in &mut entries {
                match entry.tag {
                    TAG_TILE_OFFSETS => entry.data = offsets.clone(),
                    TAG_TILE_BYTE_COUNTS => entry.data = counts.clone(),
                    _ => {}
                }
            }

            let mut fields = Vec::with_capacity(entries.len());
            for entry in &entries {
                let field = if entry.data.len() <= offset_width {
                    let mut inline = entry.data.clone();
                    inline.resize(offset_width, 0);
                    inline
                } else {
                    if blob.len() % 2 == 1 {
                        blob.push(0);
                    }
                    let field = self.encode(base + blob.len() as u64, offset_width);
                    blob.extend_from_slice(&entry.data);
                    field
                };
                fields.push(field);
            }

            out.extend(self.encode(entries.len() as u64, count_size as usize));
            for (entry, field) in entries.iter().zip(fields) {
                out.extend(self.encode(entry.tag as u64, 2));
                out.extend(self.encode(entry.field_type as u64, 2));
                out.extend(self.encode(entry.count, offset_width));
                out.extend(field);
            }
            let next = if index + 1 < self.levels.len() {
                base + blob.len() as u64
            } else {
                0
            };
            out.extend(self.encode(next, offset_width));
            out.extend(blob);
        }

        out
    }

    fn entries(&self, index: usize, level: &LevelSpec, offset_type: u16) -> Vec<Entry> {
        let tile_count = level.tiles.len() as u64;
        let mut entries = vec![
            self.scalar(TAG_IMAGE_WIDTH, TYPE_LONG, level.width as u64),
            self.scalar(TAG_IMAGE_LENGTH, TYPE_LONG, level.height as u64),
            Entry {
                tag: TAG_BITS_PER_SAMPLE,
                field_type: TYPE_SHORT,
                count: level.samples as u64,
                data: (0..level.samples).flat_map(|_| self.encode(8, 2)).collect(),
            },
            self.scalar(TAG_COMPRESSION, TYPE_SHORT, level.compression as u64),
            self.scalar(TAG_PHOTOMETRIC, TYPE_SHORT, level.photometric as u64),
        ];
        if let (0, Some(text)) = (index, &self.description) {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            entries.push(Entry {
                tag: TAG_IMAGE_DESCRIPTION,
                field_type: TYPE_ASCII,
                count: data.len() as u64,
                data,
            });
        }
        entries.extend([
            self.scalar(TAG_SAMPLES_PER_PIXEL, TYPE_SHORT, level.samples as u64),
            self.scalar(TAG_PLANAR_CONFIGURATION, TYPE_SHORT, 1),
            self.scalar(TAG_TILE_WIDTH, TYPE_LONG, level.tile_width as u64),
            self.scalar(TAG_TILE_LENGTH, TYPE_LONG, level.tile_height as u64),
            Entry {
                tag: TAG_TILE_OFFSETS,
                field_type: offset_type,
                count: tile_count,
                data: Vec::new(),
            },
            Entry {
                tag: TAG_TILE_BYTE_COUNTS,
                field_type: offset_type,
                count: tile_count,
                data: Vec::new(),
            },
        ]);
        if let Some(tables) = &level.jpeg_tables {
            entries.push(Entry {
                tag: TAG_JPEG_TABLES,
                field_type: TYPE_UNDEFINED,
                count: tables.len() as u64,
                data: tables.clone(),
            });
        }
        entries
    }

    fn scalar(&self, tag: u16, field_type: u16, value: u64) -> Entry {
        let width = if field_type == TYPE_SHORT { 2 } else { 4 };
        Entry {
            tag,
            field_type,
            count: 1,
            data: self.encode(value, width),
        }
    }

    fn encode(&self, value: u64, width: usize) -> Vec<u8> {
        if self.big_endian {
            value.to_be_bytes()[8 - width..].to_vec()
        } else {
            value.to_le_bytes()[..width].to_vec()
        }
    }
}

/// Uncompressed pyramid: `levels` levels, each half the size of the last.
pub fn pyramid(width: u32, height: u32, tile: u32, levels: usize, pixel: &[u8]) -> Vec<u8> {
    let mut builder = SlideBuilder::new();
    for index in 0..levels {
        let scale = 1u32 << index;
        builder = builder.level(LevelSpec::raw(width / scale, height / scale, tile, pixel));
    }
    builder.build()
}

/// Aperio-style JPEG pyramid with MPP and magnification in the description.
pub fn svs_slide(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    SlideBuilder::new()
        .description("Aperio Image Library v12.0.5\r\n46000x32914 [0,100 46000x32914] (256x256) JPEG/RGB Q=70|AppMag = 20|MPP = 0.4990")
        .level(LevelSpec::jpeg(width, height, 256, color))
        .level(LevelSpec::jpeg(width / 2, height / 2, 256, color))
        .build()
}

// =============================================================================
// Images
// =============================================================================

pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 95)
        .encode_image(&image)
        .unwrap();
    buf
}

pub fn decode_rgb(jpeg: &[u8]) -> RgbImage {
    image::load_from_memory(jpeg).unwrap().into_rgb8()
}

// =============================================================================
// Slide trees
// =============================================================================

pub fn write_file(root: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// A small valid slide that fits any default envelope in one request.
pub fn small_slide() -> Vec<u8> {
    pyramid(512, 384, 128, 2, &[200, 120, 180])
}

// =============================================================================
// Stub transports
// =============================================================================

pub fn api_key() -> ApiKey {
    ApiKey::new("test-key").unwrap()
}

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub at: Instant,
    pub request: PostInputsRequest,
}

impl RecordedCall {
    pub fn concepts(&self) -> Vec<String> {
        self.request.inputs[0]
            .data
            .concepts
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn metadata(&self, key: &str) -> Option<serde_json::Value> {
        self.request.inputs[0].data.metadata.get(key).cloned()
    }
}

/// Replies from a script, then with a fallback, and records every call.
pub struct RecordingTransport {
    script: Mutex<VecDeque<UploadResponse>>,
    fallback: UploadResponse,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingTransport {
    pub fn accepting() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(responses: Vec<UploadResponse>) -> Arc<Self> {
        Arc::new(Self::new(responses, UploadResponse::Accepted, None))
    }

    pub fn always(response: UploadResponse) -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), response, None))
    }

    /// Accepts everything after holding each call for `delay`.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self::new(Vec::new(), UploadResponse::Accepted, Some(delay)))
    }

    fn new(responses: Vec<UploadResponse>, fallback: UploadResponse, delay: Option<Duration>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback,
            delay,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Most calls ever in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post_inputs(&self, request: &PostInputsRequest, _api_key: &ApiKey) -> UploadResponse {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            request: request.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.active.fetch_sub(1, Ordering::SeqCst);
        response
    }
}
