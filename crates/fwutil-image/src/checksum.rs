//! CRC32, MD5 and SHA-256 helpers used by the image checkers and the
//! signed-trailer codec.

use std::io::{self, Read};

use md5::Md5;
use sha2::{Digest, Sha256};

/// 16-byte MD5 digest.
pub type Md5Digest = [u8; 16];

/// 32-byte SHA-256 digest.
pub type Sha256Digest = [u8; 32];

/// IEEE CRC32 as used by U-Boot `mkimage`.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// MD5 over an in-memory buffer.
#[must_use]
pub fn md5(bytes: &[u8]) -> Md5Digest {
    Md5::digest(bytes).into()
}

/// MD5 over the next `limit` bytes of a stream.
///
/// Returns the digest and the number of bytes actually consumed, which is
/// short of `limit` if the stream ended early.
///
/// # Errors
///
/// Propagates read errors from `reader`.
pub fn md5_stream<R: Read>(reader: R, limit: u64) -> io::Result<(Md5Digest, u64)> {
    let mut hasher = Md5::new();
    let consumed = io::copy(&mut reader.take(limit), &mut hasher)?;
    Ok((hasher.finalize().into(), consumed))
}

/// SHA-256 over an in-memory buffer.
#[must_use]
pub fn sha256(bytes: &[u8]) -> Sha256Digest {
    Sha256::digest(bytes).into()
}
