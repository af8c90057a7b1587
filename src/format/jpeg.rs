//! JPEG stream fix-ups for TIFF tiles.
//!
//! Slide tiles are often abbreviated streams: the quantization and Huffman
//! tables live once in the level's `JPEGTables` tag and every tile carries
//! only SOI, frame, scan and EOI. Before decoding, the tables are spliced back
//! in: `tables[..EOI] + tile[SOI..]`.
//!
//! Aperio also writes tiles whose samples are RGB rather than YCbCr
//! (PhotometricInterpretation = 2) without saying so inside the stream. An
//! Adobe APP14 segment with transform 0 tells the decoder to skip the color
//! transform.

use bytes::{Bytes, BytesMut};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
const MARKER_DQT: u8 = 0xDB;
const MARKER_DHT: u8 = 0xC4;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP14: u8 = 0xEE;

/// APP14 "Adobe" segment: version 100, no flags, transform 0 (no YCbCr).
const ADOBE_RGB_SEGMENT: [u8; 16] = [
    0xFF, 0xEE, 0x00, 0x0E, b'A', b'd', b'o', b'b', b'e', 0x00, 0x64, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Marker codes of the header segments before the first scan.
fn header_markers(data: &[u8]) -> Vec<u8> {
    let mut markers = Vec::new();
    if data.len() < 4 || data[0..2] != SOI {
        return markers;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        let marker = data[pos + 1];
        match marker {
            // fill byte or standalone markers without a length field
            0xFF => pos += 1,
            0x01 | 0xD0..=0xD9 => pos += 2,
            _ => {
                markers.push(marker);
                if marker == MARKER_SOS || pos + 3 >= data.len() {
                    break;
                }
                let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
                pos += 2 + length;
            }
        }
    }
    markers
}

/// A stream whose header reaches the scan without defining any tables.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    let markers = header_markers(data);
    markers.last() == Some(&MARKER_SOS)
        && !markers
            .iter()
            .any(|&m| m == MARKER_DQT || m == MARKER_DHT)
}

/// Whether the stream already declares its color handling through a JFIF or
/// Adobe application segment.
pub fn has_color_marker(data: &[u8]) -> bool {
    header_markers(data)
        .iter()
        .any(|&m| m == MARKER_APP0 || m == MARKER_APP14)
}

/// Splice shared tables into an abbreviated tile stream.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() || tile.is_empty() {
        return Bytes::copy_from_slice(tile);
    }

    let tables_body = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile_body = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables_body.len() + tile_body.len());
    merged.extend_from_slice(tables_body);
    merged.extend_from_slice(tile_body);
    merged.freeze()
}

/// Insert an Adobe APP14 (transform 0) segment right after SOI.
pub fn insert_adobe_rgb_marker(data: &[u8]) -> Bytes {
    let Some(rest) = data.strip_prefix(&SOI) else {
        return Bytes::copy_from_slice(data);
    };
    let mut out = BytesMut::with_capacity(data.len() + ADOBE_RGB_SEGMENT.len());
    out.extend_from_slice(&SOI);
    out.extend_from_slice(&ADOBE_RGB_SEGMENT);
    out.extend_from_slice(rest);
    out.freeze()
}

/// Make a raw tile stream decodable on its own.
///
/// Merges `tables` into abbreviated streams and, for RGB-photometric tiles
/// that carry no color marker, adds the Adobe transform-0 segment.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8], rgb_samples: bool) -> Bytes {
    let complete = match tables {
        Some(tables) if is_abbreviated_stream(tile) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    };

    if rgb_samples && !has_color_marker(&complete) {
        insert_adobe_rgb_marker(&complete)
    } else {
        complete
    }
}
