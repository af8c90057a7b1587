//! Reading IFD entry values, inline or out-of-line.
//!
//! Arrays such as TileOffsets are fetched with a single range read.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Resolves entry values against the file they came from.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    /// Raw value bytes of an entry.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let len = entry
            .value_len()
            .ok_or(TiffError::UnknownFieldType(entry.raw_field_type))?;

        if entry.inline {
            return Ok(Bytes::copy_from_slice(&entry.value[..len as usize]));
        }

        let len = usize::try_from(len).map_err(|_| TiffError::InvalidTagValue {
            tag: "entry",
            message: format!("value length {len} is not addressable"),
        })?;
        let offset = entry.value_offset(self.header);
        Ok(self.reader.read_exact_at(offset, len).await?)
    }

    /// Integer array (Short, Long or Long8) widened to u64.
    pub async fn read_integers(
        &self,
        entry: &IfdEntry,
        tag: &'static str,
    ) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.raw_field_type))?;
        let width = match field_type {
            FieldType::Short | FieldType::Long | FieldType::Long8 => {
                field_type.element_size() as usize
            }
            other => {
                return Err(TiffError::InvalidTagValue {
                    tag,
                    message: format!("expected an integer array, got {other:?}"),
                })
            }
        };

        let bytes = self.read_bytes(entry).await?;
        let order = self.header.byte_order;
        let values = bytes
            .chunks_exact(width)
            .map(|chunk| match field_type {
                FieldType::Short => order.read_u16(chunk) as u64,
                FieldType::Long => order.read_u32(chunk) as u64,
                _ => order.read_u64(chunk),
            })
            .collect();

        Ok(values)
    }

    /// ASCII value with trailing NULs stripped. Invalid UTF-8 is replaced.
    pub async fn read_ascii(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry).await?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.trim_end_matches('\0').to_string())
    }
}
