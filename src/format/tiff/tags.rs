//! TIFF field types, tag ids and the enumerated values the slide reader cares
//! about.

// =============================================================================
// Field types
// =============================================================================

/// Encoding of the values stored in an IFD entry.
///
/// Only the integer and byte types that appear in slide IFDs are modelled;
/// entries of any other type are kept but never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Undefined = 7,
    /// BigTIFF only
    Long8 = 16,
}

impl FieldType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            7 => FieldType::Undefined,
            16 => FieldType::Long8,
            _ => return None,
        })
    }

    /// Width of one element in bytes.
    #[inline]
    pub const fn element_size(self) -> u64 {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Long8 => 8,
        }
    }

    /// Whether `count` elements fit in the entry's value field
    /// (4 bytes in classic TIFF, 8 in BigTIFF).
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let capacity = if is_bigtiff { 8 } else { 4 };
        self.element_size().saturating_mul(count) <= capacity
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Tag ids read by the pyramid parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Free text; carries the vendor metadata block in Aperio files
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    PlanarConfiguration = 284,
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    /// Shared quantization and Huffman tables for abbreviated JPEG tiles
    JpegTables = 347,
}

impl TiffTag {
    #[inline]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Human-readable name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            TiffTag::NewSubfileType => "NewSubfileType",
            TiffTag::ImageWidth => "ImageWidth",
            TiffTag::ImageLength => "ImageLength",
            TiffTag::BitsPerSample => "BitsPerSample",
            TiffTag::Compression => "Compression",
            TiffTag::PhotometricInterpretation => "PhotometricInterpretation",
            TiffTag::ImageDescription => "ImageDescription",
            TiffTag::StripOffsets => "StripOffsets",
            TiffTag::SamplesPerPixel => "SamplesPerPixel",
            TiffTag::RowsPerStrip => "RowsPerStrip",
            TiffTag::StripByteCounts => "StripByteCounts",
            TiffTag::PlanarConfiguration => "PlanarConfiguration",
            TiffTag::TileWidth => "TileWidth",
            TiffTag::TileLength => "TileLength",
            TiffTag::TileOffsets => "TileOffsets",
            TiffTag::TileByteCounts => "TileByteCounts",
            TiffTag::JpegTables => "JPEGTables",
        }
    }
}

// =============================================================================
// Enumerated values
// =============================================================================

/// Compression schemes seen in slide files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    OldJpeg,
    Jpeg,
    Deflate,
    Jpeg2000,
    Other(u16),
}

impl Compression {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Compression::None,
            5 => Compression::Lzw,
            6 => Compression::OldJpeg,
            7 => Compression::Jpeg,
            8 | 32946 => Compression::Deflate,
            // 33003 and 33005 are the Aperio JPEG 2000 variants
            33003 | 33005 => Compression::Jpeg2000,
            other => Compression::Other(other),
        }
    }

    /// Tile codecs the extractor can decode.
    pub const fn is_supported(self) -> bool {
        matches!(self, Compression::None | Compression::Jpeg)
    }

    pub fn name(self) -> String {
        match self {
            Compression::None => "none".to_string(),
            Compression::Lzw => "LZW".to_string(),
            Compression::OldJpeg => "old-style JPEG".to_string(),
            Compression::Jpeg => "JPEG".to_string(),
            Compression::Deflate => "Deflate".to_string(),
            Compression::Jpeg2000 => "JPEG 2000".to_string(),
            Compression::Other(value) => format!("unknown ({value})"),
        }
    }
}

/// PhotometricInterpretation value for grayscale with black at zero.
pub const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;

/// PhotometricInterpretation value for RGB samples.
///
/// On JPEG tiles this means the scan data is stored untransformed, which the
/// decoder must be told through an Adobe marker.
pub const PHOTOMETRIC_RGB: u16 = 2;

/// PhotometricInterpretation value for YCbCr samples.
pub const PHOTOMETRIC_YCBCR: u16 = 6;

/// PlanarConfiguration value for interleaved samples.
pub const PLANAR_CHUNKY: u16 = 1;
