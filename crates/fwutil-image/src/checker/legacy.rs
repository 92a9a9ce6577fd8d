//! U-Boot legacy (`mkimage`) image checker.

use crate::checksum::crc32;
use crate::error::CheckFailure;
use crate::reader::{BinaryReader, widen};

use super::ImageChecker;

/// `IH_MAGIC`.
pub const LEGACY_MAGIC: u32 = 0x2705_1956;
/// Header length; the payload starts right after it.
pub const LEGACY_HEADER_LEN: usize = 64;

const HCRC_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 12;
const DCRC_OFFSET: usize = 24;
const NAME_OFFSET: usize = 32;
const NAME_LEN: usize = 32;

/// Decoded legacy header fields relevant to validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyHeader {
    /// Stored header CRC
    pub header_crc: u32,
    /// Payload length in bytes
    pub data_size: u32,
    /// Stored payload CRC
    pub data_crc: u32,
    /// Image name, NUL padding stripped
    pub name: String,
}

impl LegacyHeader {
    /// Decode the header at the start of `bytes` and verify magic and header CRC.
    ///
    /// # Errors
    ///
    /// Returns [`CheckFailure::Truncated`], [`CheckFailure::BadMagic`] or
    /// [`CheckFailure::HeaderCrc`].
    pub fn parse(bytes: &[u8]) -> Result<Self, CheckFailure> {
        let truncated = || CheckFailure::Truncated {
            needed: LEGACY_HEADER_LEN as u64,
            available: bytes.len() as u64,
        };
        let reader = BinaryReader::new(bytes);
        let mut header: [u8; LEGACY_HEADER_LEN] = reader.array(0).ok_or_else(truncated)?;
        let fields = BinaryReader::new(&header);

        let magic = fields.be_u32(0).ok_or_else(truncated)?;
        if magic != LEGACY_MAGIC {
            return Err(CheckFailure::BadMagic { found: magic });
        }

        let header_crc = fields.be_u32(HCRC_OFFSET).ok_or_else(truncated)?;
        let data_size = fields.be_u32(SIZE_OFFSET).ok_or_else(truncated)?;
        let data_crc = fields.be_u32(DCRC_OFFSET).ok_or_else(truncated)?;
        let name = fields
            .slice(NAME_OFFSET, NAME_LEN)
            .map(|raw| {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(raw.get(..end).unwrap_or_default()).into_owned()
            })
            .unwrap_or_default();

        // The CRC covers the header with its own CRC field zeroed; `header` is
        // already a private copy.
        if let Some(field) = header.get_mut(HCRC_OFFSET..HCRC_OFFSET + 4) {
            field.fill(0);
        }
        let computed = crc32(&header);
        if computed != header_crc {
            return Err(CheckFailure::HeaderCrc {
                stored: header_crc,
                computed,
            });
        }

        Ok(Self {
            header_crc,
            data_size,
            data_crc,
            name,
        })
    }
}

/// Accepts a partition holding a legacy header plus matching payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyChecker;

impl ImageChecker for LegacyChecker {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn check(&self, bytes: &[u8]) -> Result<(), CheckFailure> {
        let header = LegacyHeader::parse(bytes)?;

        let needed = LEGACY_HEADER_LEN as u64 + u64::from(header.data_size);
        let payload = BinaryReader::new(bytes)
            .slice(LEGACY_HEADER_LEN, widen(header.data_size))
            .ok_or(CheckFailure::Truncated {
                needed,
                available: bytes.len() as u64,
            })?;

        let computed = crc32(payload);
        if computed != header.data_crc {
            return Err(CheckFailure::DataCrc {
                stored: header.data_crc,
                computed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(payload: &[u8]) -> Vec<u8> {
        let mut header = [0u8; LEGACY_HEADER_LEN];
        header[..4].copy_from_slice(&LEGACY_MAGIC.to_be_bytes());
        header[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        header[DCRC_OFFSET..DCRC_OFFSET + 4].copy_from_slice(&crc32(payload).to_be_bytes());
        header[NAME_OFFSET..NAME_OFFSET + 6].copy_from_slice(b"kernel");
        let hcrc = crc32(&header);
        header[HCRC_OFFSET..HCRC_OFFSET + 4].copy_from_slice(&hcrc.to_be_bytes());
        let mut image = header.to_vec();
        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn test_valid_image() -> Result<(), CheckFailure> {
        let image = build(b"hello, flash");
        LegacyChecker.check(&image)?;
        let header = LegacyHeader::parse(&image)?;
        assert_eq!(header.name, "kernel");
        assert_eq!(header.data_size, 12);
        Ok(())
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut image = build(b"payload");
        image.extend_from_slice(&[0xFF; 128]);
        assert!(LegacyChecker.is_valid(&image));
    }

    #[test]
    fn test_short_header() {
        assert_eq!(
            LegacyChecker.check(&[0u8; 10]),
            Err(CheckFailure::Truncated {
                needed: 64,
                available: 10
            })
        );
    }

    #[test]
    fn test_payload_past_partition_end() {
        let mut image = build(b"0123456789");
        image.truncate(image.len() - 1);
        assert!(matches!(
            LegacyChecker.check(&image),
            Err(CheckFailure::Truncated { needed: 74, available: 73 })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut image = build(b"x");
        image[0] = 0x28;
        assert!(matches!(
            LegacyChecker.check(&image),
            Err(CheckFailure::BadMagic { .. })
        ));
    }

    #[test]
    fn test_header_crc_mismatch() {
        let mut image = build(b"x");
        image[40] ^= 0x01;
        assert!(matches!(
            LegacyChecker.check(&image),
            Err(CheckFailure::HeaderCrc { .. })
        ));
    }

    #[test]
    fn test_data_crc_mismatch() {
        let mut image = build(b"abcdef");
        image[LEGACY_HEADER_LEN + 2] ^= 0x80;
        assert!(matches!(
            LegacyChecker.check(&image),
            Err(CheckFailure::DataCrc { .. })
        ));
    }

    #[test]
    fn test_check_does_not_mutate_input() {
        let image = build(b"immutable");
        let before = image.clone();
        let _ = LegacyChecker.is_valid(&image);
        assert_eq!(image, before);
    }
}
