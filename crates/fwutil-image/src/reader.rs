//! Bounds-checked big-endian reads over a borrowed byte buffer.
//!
//! Every accessor returns `None` when the requested range falls outside the
//! buffer, so callers decide whether that is a failure or just "not there".

/// Read-only view over a byte slice with offset-based, big-endian accessors.
#[derive(Debug, Clone, Copy)]
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
}

impl<'a> BinaryReader<'a> {
    /// Wrap a byte slice.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The underlying buffer.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Single byte at `offset`.
    #[must_use]
    pub fn u8(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    /// Big-endian `u16` at `offset`.
    #[must_use]
    pub fn be_u16(&self, offset: usize) -> Option<u16> {
        self.array::<2>(offset).map(u16::from_be_bytes)
    }

    /// Big-endian `u32` at `offset`.
    #[must_use]
    pub fn be_u32(&self, offset: usize) -> Option<u32> {
        self.array::<4>(offset).map(u32::from_be_bytes)
    }

    /// Fixed-size array copied out of the buffer at `offset`.
    #[must_use]
    pub fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.slice(offset, N)?.try_into().ok()
    }

    /// `len` bytes starting at `offset`.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    /// Everything from `offset` to the end of the buffer.
    #[must_use]
    pub fn tail(&self, offset: usize) -> Option<&'a [u8]> {
        self.bytes.get(offset..)
    }

    /// NUL-terminated UTF-8 string starting at `offset`, without the terminator.
    #[must_use]
    pub fn cstr(&self, offset: usize) -> Option<&'a str> {
        let rest = self.tail(offset)?;
        let nul = rest.iter().position(|&b| b == 0)?;
        std::str::from_utf8(rest.get(..nul)?).ok()
    }
}

/// Widen a 32-bit on-disk length or offset to `usize`.
///
/// Saturates on targets where `usize` is narrower than 32 bits, which makes
/// the subsequent range lookup fail instead of wrapping.
#[must_use]
pub fn widen(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_reads() {
        let reader = BinaryReader::new(&[0x27, 0x05, 0x19, 0x56, 0xAA]);
        assert_eq!(reader.be_u32(0), Some(0x2705_1956));
        assert_eq!(reader.be_u16(3), Some(0x56AA));
        assert_eq!(reader.u8(4), Some(0xAA));
    }

    #[test]
    fn test_reads_past_end_are_none() {
        let reader = BinaryReader::new(&[1, 2, 3]);
        assert_eq!(reader.be_u32(0), None);
        assert_eq!(reader.be_u16(2), None);
        assert_eq!(reader.u8(3), None);
        assert_eq!(reader.slice(usize::MAX, 2), None);
    }

    #[test]
    fn test_cstr() {
        let reader = BinaryReader::new(b"images\0sha256\0tail");
        assert_eq!(reader.cstr(0), Some("images"));
        assert_eq!(reader.cstr(7), Some("sha256"));
        assert_eq!(reader.cstr(14), None);
    }
}
