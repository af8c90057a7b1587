//! TIFF header and IFD parsing.
//!
//! Classic TIFF header (8 bytes): byte order `II`/`MM`, version 42, 4-byte
//! offset of the first IFD. BigTIFF header (16 bytes): byte order, version 43,
//! offset size (always 8), reserved word, 8-byte first IFD offset.
//!
//! An IFD is an entry count, a run of fixed-size entries (12 bytes classic,
//! 20 bytes BigTIFF) and the offset of the next IFD (0 terminates the chain).

use super::tags::{FieldType, TiffTag};
use crate::error::TiffError;

const MAGIC_LITTLE_ENDIAN: u16 = 0x4949;
const MAGIC_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

pub const TIFF_HEADER_SIZE: usize = 8;
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on entries in a single IFD. Real slide IFDs hold a few dozen.
pub const MAX_IFD_ENTRIES: u64 = 4096;

// =============================================================================
// ByteOrder
// =============================================================================

/// Endianness declared by the first two header bytes.
///
/// The read helpers expect slices of at least the value's width; callers size
/// their buffers from the header before reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed file header: byte order, classic/BigTIFF flavour, first IFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the header from the first bytes of a file of `file_size` bytes.
    ///
    /// `bytes` may be shorter than 16 when the file itself is; a BigTIFF
    /// version word with fewer than 16 bytes is reported as `FileTooSmall`.
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            MAGIC_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            MAGIC_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Bytes in the entry-count field that opens an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Width of offsets: the next-IFD link and each entry's value field.
    #[inline]
    pub const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Read the IFD entry count from the start of an IFD.
    pub fn read_entry_count(&self, bytes: &[u8]) -> Result<u64, TiffError> {
        if bytes.len() < self.ifd_count_size() {
            return Err(TiffError::FileTooSmall {
                required: self.ifd_count_size() as u64,
                actual: bytes.len() as u64,
            });
        }
        let count = if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        };
        if count > MAX_IFD_ENTRIES {
            return Err(TiffError::TooManyEntries(count));
        }
        Ok(count)
    }

    /// Total byte length of an IFD holding `entry_count` entries.
    pub fn ifd_size(&self, entry_count: u64) -> u64 {
        self.ifd_count_size() as u64
            + entry_count * self.ifd_entry_size() as u64
            + self.offset_size() as u64
    }
}

// =============================================================================
// IFD entries
// =============================================================================

/// One 12- or 20-byte IFD entry.
///
/// `value` holds the raw value field: the values themselves when `inline`,
/// otherwise the file offset where they live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: Option<FieldType>,
    pub raw_field_type: u16,
    pub count: u64,
    pub value: [u8; 8],
    pub inline: bool,
}

impl IfdEntry {
    /// Total byte length of the entry's values, if the type is known.
    pub fn value_len(&self) -> Option<u64> {
        self.field_type
            .and_then(|t| t.element_size().checked_mul(self.count))
    }

    /// Offset of out-of-line values.
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        if header.is_bigtiff {
            header.byte_order.read_u64(&self.value)
        } else {
            header.byte_order.read_u32(&self.value) as u64
        }
    }

    /// The first value as an integer, when it is stored inline.
    ///
    /// Covers the scalar tags (dimensions, tile size, compression,
    /// photometric) which are always a single inline Short or Long.
    pub fn inline_scalar(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.inline || self.count == 0 {
            return None;
        }
        match self.field_type? {
            FieldType::Byte | FieldType::Undefined => Some(self.value[0] as u64),
            FieldType::Short => Some(byte_order.read_u16(&self.value) as u64),
            FieldType::Long => Some(byte_order.read_u32(&self.value) as u64),
            FieldType::Long8 => Some(byte_order.read_u64(&self.value)),
            FieldType::Ascii => None,
        }
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ifd {
    pub entries: Vec<IfdEntry>,
    pub next_offset: u64,
}

impl Ifd {
    /// Parse an IFD from `bytes`, which must start at the entry count and
    /// cover the whole directory (see [`TiffHeader::ifd_size`]).
    pub fn parse(bytes: &[u8], header: &TiffHeader) -> Result<Self, TiffError> {
        let count = header.read_entry_count(bytes)?;
        let required = header.ifd_size(count);
        if (bytes.len() as u64) < required {
            return Err(TiffError::FileTooSmall {
                required,
                actual: bytes.len() as u64,
            });
        }

        let order = header.byte_order;
        let entry_size = header.ifd_entry_size();
        let mut entries = Vec::with_capacity(count as usize);

        for index in 0..count as usize {
            let start = header.ifd_count_size() + index * entry_size;
            let raw = &bytes[start..start + entry_size];

            let tag = order.read_u16(&raw[0..2]);
            let raw_field_type = order.read_u16(&raw[2..4]);
            let (count, value_bytes) = if header.is_bigtiff {
                (order.read_u64(&raw[4..12]), &raw[12..20])
            } else {
                (order.read_u32(&raw[4..8]) as u64, &raw[8..12])
            };

            let mut value = [0u8; 8];
            value[..value_bytes.len()].copy_from_slice(value_bytes);

            let field_type = FieldType::from_u16(raw_field_type);
            let inline = field_type
                .map(|t| t.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);

            entries.push(IfdEntry {
                tag,
                field_type,
                raw_field_type,
                count,
                value,
                inline,
            });
        }

        let next_start = (required as usize) - header.offset_size();
        let next_offset = if header.is_bigtiff {
            order.read_u64(&bytes[next_start..])
        } else {
            order.read_u32(&bytes[next_start..]) as u64
        };

        Ok(Ifd {
            entries,
            next_offset,
        })
    }

    pub fn entry(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag.id())
    }

    pub fn has(&self, tag: TiffTag) -> bool {
        self.entry(tag).is_some()
    }

    /// Inline scalar value of `tag`, if present.
    pub fn scalar(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u64> {
        self.entry(tag)?.inline_scalar(byte_order)
    }

    /// Inline scalar value of `tag` narrowed to u32, failing if absent.
    pub fn required_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Result<u32, TiffError> {
        let value = self
            .scalar(tag, byte_order)
            .ok_or(TiffError::MissingTag(tag.name()))?;
        u32::try_from(value).map_err(|_| TiffError::InvalidTagValue {
            tag: tag.name(),
            message: format!("{value} does not fit in 32 bits"),
        })
    }

    pub fn is_tiled(&self) -> bool {
        self.has(TiffTag::TileWidth)
            && self.has(TiffTag::TileLength)
            && self.has(TiffTag::TileOffsets)
            && self.has(TiffTag::TileByteCounts)
    }

    pub fn is_stripped(&self) -> bool {
        self.has(TiffTag::StripOffsets)
    }
}
