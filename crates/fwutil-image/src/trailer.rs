//! Vendor-signed image trailer.
//!
//! Signed images end with a 64-byte trailer:
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0  | 16 | MD5 of everything before the trailer |
//! | 16 | 16 | project code, space/NUL padded |
//! | 32 | 13 | firmware version |
//! | 45 | 3  | error proof: `board | stage << 5`, component, vendor |
//! | 48 | 16 | MD5 of trailer bytes 0..48 |
//!
//! Both digests must verify before any identity field is trusted.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::checksum::{Md5Digest, md5, md5_stream};
use crate::error::{FormatError, IdentityMismatch, Md5Stage};
use crate::reader::BinaryReader;

/// Trailer length in bytes.
pub const TRAILER_LEN: usize = 64;
/// Project code field length.
pub const PROJECT_CODE_LEN: usize = 16;
/// Firmware version field length.
pub const FW_VERSION_LEN: usize = 13;
/// Target component id meaning "accept any component id".
pub const COMPONENT_VERIFY_SKIPPED: u8 = 0xFF;

const PROJECT_OFFSET: usize = 16;
const VERSION_OFFSET: usize = 32;
const PROOF_OFFSET: usize = 45;
const SIGNED_LEN: usize = 48;

const BOARD_MASK: u8 = 0x1F;
const STAGE_SHIFT: u32 = 5;

const COPY_CHUNK: usize = 64 * 1024;

/// Identity fields carried in the error-proof area of a signed trailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    /// Project code with trailing padding removed
    pub project_name: String,
    /// Board id (5 bits)
    pub board_id: u8,
    /// Build stage (3 bits)
    pub stage_id: u8,
    /// Component id
    pub component_id: u8,
    /// Vendor id
    pub vendor_id: u8,
}

impl SignedHeader {
    /// Whether an image carrying `self` may be written to `target`.
    ///
    /// Project, board and vendor must match; component must match unless the
    /// target uses [`COMPONENT_VERIFY_SKIPPED`]. Stage is not compared.
    #[must_use]
    pub fn is_compatible(&self, target: &SignedHeader) -> bool {
        self.verify_against(target, StagePolicy::Informational)
            .is_ok()
    }

    /// Compare `self` (from an image) against the `target` identity.
    ///
    /// # Errors
    ///
    /// Returns the first mismatching field.
    pub fn verify_against(
        &self,
        target: &SignedHeader,
        stage: StagePolicy,
    ) -> Result<(), IdentityMismatch> {
        if trim_padding(&self.project_name) != trim_padding(&target.project_name) {
            return Err(IdentityMismatch::Project {
                expected: trim_padding(&target.project_name).to_owned(),
                found: trim_padding(&self.project_name).to_owned(),
            });
        }
        if self.board_id != target.board_id {
            return Err(IdentityMismatch::Board {
                expected: target.board_id,
                found: self.board_id,
            });
        }
        if stage == StagePolicy::Exact && self.stage_id != target.stage_id {
            return Err(IdentityMismatch::Stage {
                expected: target.stage_id,
                found: self.stage_id,
            });
        }
        if target.component_id != COMPONENT_VERIFY_SKIPPED
            && self.component_id != target.component_id
        {
            return Err(IdentityMismatch::Component {
                expected: target.component_id,
                found: self.component_id,
            });
        }
        if self.vendor_id != target.vendor_id {
            return Err(IdentityMismatch::Vendor {
                expected: target.vendor_id,
                found: self.vendor_id,
            });
        }
        Ok(())
    }
}

/// Whether the trailer's stage must equal the target's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    /// Stage is reported but not enforced
    #[default]
    Informational,
    /// Stage must match; a mismatch needs a forced update
    Exact,
}

/// How to render the firmware version field for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStyle {
    /// Four little-endian bytes printed most significant first, `%02X` each
    Cpld,
    /// `v<major hex>.<minor %02X>` from bytes 3 and 2
    Bic,
    /// Printable text with padding removed
    #[default]
    Text,
}

/// Decoded signed trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTrailer {
    payload_md5: Md5Digest,
    project_code: [u8; PROJECT_CODE_LEN],
    fw_version: [u8; FW_VERSION_LEN],
    error_proof: [u8; 3],
}

impl SignedTrailer {
    /// Build a trailer for a payload. Board and stage are masked to 5 and 3 bits.
    #[must_use]
    pub fn new(header: &SignedHeader, payload_md5: Md5Digest, fw_version: &[u8]) -> Self {
        let mut project_code = [b' '; PROJECT_CODE_LEN];
        for (dst, src) in project_code.iter_mut().zip(header.project_name.bytes()) {
            *dst = src;
        }
        let mut version = [0u8; FW_VERSION_LEN];
        for (dst, src) in version.iter_mut().zip(fw_version) {
            *dst = *src;
        }
        Self {
            payload_md5,
            project_code,
            fw_version: version,
            error_proof: [
                (header.board_id & BOARD_MASK) | (header.stage_id << STAGE_SHIFT),
                header.component_id,
                header.vendor_id,
            ],
        }
    }

    /// Decode a trailer, verifying its own digest (MD5-2).
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::DigestMismatch`] with [`Md5Stage::Trailer`] if
    /// the trailer digest does not match.
    pub fn parse(bytes: &[u8; TRAILER_LEN]) -> Result<Self, FormatError> {
        let reader = BinaryReader::new(bytes);
        let corrupt = || FormatError::DigestMismatch {
            stage: Md5Stage::Trailer,
        };
        let signed = reader.slice(0, SIGNED_LEN).ok_or_else(corrupt)?;
        let stored: Md5Digest = reader.array(SIGNED_LEN).ok_or_else(corrupt)?;
        if md5(signed) != stored {
            return Err(corrupt());
        }
        Ok(Self {
            payload_md5: reader.array(0).ok_or_else(corrupt)?,
            project_code: reader.array(PROJECT_OFFSET).ok_or_else(corrupt)?,
            fw_version: reader.array(VERSION_OFFSET).ok_or_else(corrupt)?,
            error_proof: reader.array(PROOF_OFFSET).ok_or_else(corrupt)?,
        })
    }

    /// Encode to the on-disk layout, computing the trailer digest.
    #[must_use]
    pub fn encode(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        let mut signed = Vec::with_capacity(SIGNED_LEN);
        signed.extend_from_slice(&self.payload_md5);
        signed.extend_from_slice(&self.project_code);
        signed.extend_from_slice(&self.fw_version);
        signed.extend_from_slice(&self.error_proof);
        let trailer_md5 = md5(&signed);
        for (dst, src) in out.iter_mut().zip(signed.iter().chain(trailer_md5.iter())) {
            *dst = *src;
        }
        out
    }

    /// Digest of the payload (MD5-1) as recorded in the trailer.
    #[must_use]
    pub fn payload_md5(&self) -> Md5Digest {
        self.payload_md5
    }

    /// Raw firmware version field.
    #[must_use]
    pub fn fw_version(&self) -> &[u8; FW_VERSION_LEN] {
        &self.fw_version
    }

    /// Firmware version rendered for display.
    #[must_use]
    pub fn image_version(&self, style: VersionStyle) -> String {
        let [b0, b1, b2, b3, ..] = self.fw_version;
        match style {
            VersionStyle::Cpld => format!("{b3:02X}{b2:02X}{b1:02X}{b0:02X}"),
            VersionStyle::Bic => format!("v{b3:x}.{b2:02X}"),
            VersionStyle::Text => {
                let text: String = self
                    .fw_version
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| char::from(b))
                    .collect();
                text.trim_end().to_owned()
            }
        }
    }

    /// Identity fields.
    #[must_use]
    pub fn header(&self) -> SignedHeader {
        let [proof, component_id, vendor_id] = self.error_proof;
        SignedHeader {
            project_name: trim_padding(&String::from_utf8_lossy(&self.project_code)).to_owned(),
            board_id: proof & BOARD_MASK,
            stage_id: proof >> STAGE_SHIFT,
            component_id,
            vendor_id,
        }
    }
}

fn trim_padding(s: &str) -> &str {
    s.trim_end_matches(['\0', ' '])
}

/// Verifies signed images against the identity of one update target.
#[derive(Debug, Clone)]
pub struct SignedImageVerifier {
    expected: SignedHeader,
    stage: StagePolicy,
}

impl SignedImageVerifier {
    /// Verifier for images targeting `expected`.
    #[must_use]
    pub fn new(expected: SignedHeader) -> Self {
        Self {
            expected,
            stage: StagePolicy::default(),
        }
    }

    /// Enforce the build stage as well.
    #[must_use]
    pub fn with_stage_policy(mut self, stage: StagePolicy) -> Self {
        self.stage = stage;
        self
    }

    /// Identity images must carry.
    #[must_use]
    pub fn expected(&self) -> &SignedHeader {
        &self.expected
    }

    /// Locate and verify the trailer of the image at `path`.
    ///
    /// With `force`, no check is made and the whole file is treated as
    /// payload; its digest is computed so later copies can be tracked.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::TooSmall`], a [`FormatError::DigestMismatch`]
    /// for either digest, or [`FormatError::Identity`] when the image is for
    /// a different target. I/O failures surface as [`FormatError::Io`].
    pub fn extract_and_verify(
        &self,
        path: impl AsRef<Path>,
        force: bool,
    ) -> Result<SignedPayload, FormatError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| FormatError::io(path, e))?;
        let file_size = file.metadata().map_err(|e| FormatError::io(path, e))?.len();

        if force {
            warn!(path = %path.display(), "forced update, skipping signed image checks");
            let (digest, _) = md5_stream(&mut file, file_size).map_err(|e| FormatError::io(path, e))?;
            return Ok(SignedPayload {
                path: path.to_path_buf(),
                payload_len: file_size,
                digest,
                trailer: None,
            });
        }

        let payload_len = file_size
            .checked_sub(TRAILER_LEN as u64)
            .ok_or(FormatError::TooSmall { size: file_size })?;

        let mut raw = [0u8; TRAILER_LEN];
        file.seek(SeekFrom::Start(payload_len))
            .and_then(|_| file.read_exact(&mut raw))
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .map_err(|e| FormatError::io(path, e))?;

        let (payload_md5, _) =
            md5_stream(&mut file, payload_len).map_err(|e| FormatError::io(path, e))?;
        let stored: Md5Digest = BinaryReader::new(&raw)
            .array(0)
            .ok_or(FormatError::TooSmall { size: file_size })?;
        if payload_md5 != stored {
            return Err(FormatError::DigestMismatch {
                stage: Md5Stage::Payload,
            });
        }

        let trailer = SignedTrailer::parse(&raw)?;
        let header = trailer.header();
        header.verify_against(&self.expected, self.stage)?;
        info!(
            project = %header.project_name,
            board = header.board_id,
            stage = header.stage_id,
            component = header.component_id,
            md5 = %hex::encode(payload_md5),
            "signed image verified"
        );

        Ok(SignedPayload {
            path: path.to_path_buf(),
            payload_len,
            digest: payload_md5,
            trailer: Some(trailer),
        })
    }
}

/// Result of [`SignedImageVerifier::extract_and_verify`].
#[derive(Debug, Clone)]
pub struct SignedPayload {
    path: PathBuf,
    payload_len: u64,
    digest: Md5Digest,
    trailer: Option<SignedTrailer>,
}

impl SignedPayload {
    /// Source image path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Payload length in bytes (whole file when forced).
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        self.payload_len
    }

    /// Payload digest.
    #[must_use]
    pub fn digest(&self) -> Md5Digest {
        self.digest
    }

    /// Decoded trailer; `None` for a forced extraction.
    #[must_use]
    pub fn trailer(&self) -> Option<&SignedTrailer> {
        self.trailer.as_ref()
    }

    /// Whether the checks were skipped.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.trailer.is_none()
    }

    /// Copy the payload to a private, read-only temporary file.
    ///
    /// Unless forced, the copy is re-hashed against the trailer digest so a
    /// file changed after verification is not written.
    ///
    /// # Errors
    ///
    /// As [`copy_payload`].
    pub fn copy_payload(&self) -> Result<PayloadFile, FormatError> {
        let expected = self.trailer.as_ref().map(SignedTrailer::payload_md5);
        copy_payload(&self.path, self.payload_len, expected)
    }
}

/// A temporary, read-only copy of an image payload. Removed on drop.
#[derive(Debug)]
pub struct PayloadFile {
    file: NamedTempFile,
    len: u64,
    digest: Md5Digest,
}

impl PayloadFile {
    /// Path of the temporary copy.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Bytes copied.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the copy is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Digest of the copied bytes.
    #[must_use]
    pub fn digest(&self) -> Md5Digest {
        self.digest
    }

    /// Read the whole copy back into memory.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn read_all(&self) -> Result<Vec<u8>, FormatError> {
        fs::read(self.path()).map_err(|e| FormatError::io(self.path(), e))
    }
}

/// Copy the first `size` bytes of `path` into a private temporary file and
/// mark it read-only.
///
/// When `expected` is given the copied bytes must hash to it.
///
/// # Errors
///
/// Returns [`FormatError::PayloadTooLarge`] if `size` exceeds the file,
/// [`FormatError::DigestMismatch`] on a digest mismatch, or
/// [`FormatError::Io`].
pub fn copy_payload(
    path: impl AsRef<Path>,
    size: u64,
    expected: Option<Md5Digest>,
) -> Result<PayloadFile, FormatError> {
    let path = path.as_ref();
    let mut source = File::open(path).map_err(|e| FormatError::io(path, e))?;
    let available = source.metadata().map_err(|e| FormatError::io(path, e))?.len();
    if size > available {
        return Err(FormatError::PayloadTooLarge {
            requested: size,
            available,
        });
    }

    let mut temp = NamedTempFile::new().map_err(|e| FormatError::io(path, e))?;
    let digest = tee_copy(&mut source, temp.as_file_mut(), size)
        .map_err(|e| FormatError::io(temp.path(), e))?;
    debug!(path = %path.display(), copy = %temp.path().display(), size, "payload copied");

    let mut permissions = temp
        .as_file()
        .metadata()
        .map_err(|e| FormatError::io(temp.path(), e))?
        .permissions();
    permissions.set_readonly(true);
    fs::set_permissions(temp.path(), permissions).map_err(|e| FormatError::io(temp.path(), e))?;

    if let Some(expected) = expected
        && expected != digest
    {
        return Err(FormatError::DigestMismatch {
            stage: Md5Stage::Payload,
        });
    }

    Ok(PayloadFile {
        file: temp,
        len: size,
        digest,
    })
}

fn tee_copy<R: Read, W: Write>(source: &mut R, sink: &mut W, size: u64) -> io::Result<Md5Digest> {
    let mut hasher = Md5::new();
    let mut remaining = size;
    let mut buf = vec![0u8; COPY_CHUNK];
    while remaining > 0 {
        let want = usize::try_from(remaining).unwrap_or(COPY_CHUNK).min(COPY_CHUNK);
        let chunk = buf.get_mut(..want).ok_or(io::ErrorKind::InvalidInput)?;
        source.read_exact(chunk)?;
        hasher.update(&*chunk);
        sink.write_all(chunk)?;
        remaining = remaining.saturating_sub(want as u64);
    }
    sink.flush()?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> SignedHeader {
        SignedHeader {
            project_name: "Yosemite V3.5".to_owned(),
            board_id: 0x0A,
            stage_id: 3,
            component_id: 0x02,
            vendor_id: 0x01,
        }
    }

    #[test]
    fn test_error_proof_packing() -> Result<(), FormatError> {
        let trailer = SignedTrailer::new(&header(), [0u8; 16], b"v1.02");
        let decoded = SignedTrailer::parse(&trailer.encode())?;
        assert_eq!(decoded.header(), header());
        assert_eq!(decoded.error_proof, [0x0A | (3 << 5), 0x02, 0x01]);
        Ok(())
    }

    #[test]
    fn test_project_padding_is_trimmed() -> Result<(), FormatError> {
        let trailer = SignedTrailer::new(&header(), [0u8; 16], b"");
        assert_eq!(&trailer.project_code, b"Yosemite V3.5   ");
        assert_eq!(SignedTrailer::parse(&trailer.encode())?.header().project_name, "Yosemite V3.5");
        Ok(())
    }

    #[test]
    fn test_trailer_digest_mismatch() {
        let mut raw = SignedTrailer::new(&header(), [0u8; 16], b"1").encode();
        if let Some(byte) = raw.get_mut(PROOF_OFFSET) {
            *byte ^= 0x01;
        }
        assert!(matches!(
            SignedTrailer::parse(&raw),
            Err(FormatError::DigestMismatch {
                stage: Md5Stage::Trailer
            })
        ));
    }

    #[test]
    fn test_version_styles() {
        let trailer = SignedTrailer::new(&header(), [0u8; 16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(trailer.image_version(VersionStyle::Cpld), "01020304");
        assert_eq!(trailer.image_version(VersionStyle::Bic), "v1.02");
        let text = SignedTrailer::new(&header(), [0u8; 16], b"oby35-v2023.1");
        assert_eq!(text.image_version(VersionStyle::Text), "oby35-v2023.1");
    }

    #[test]
    fn test_component_skip() {
        let mut target = header();
        target.component_id = COMPONENT_VERIFY_SKIPPED;
        let mut image = header();
        image.component_id = 0x77;
        assert!(image.is_compatible(&target));
        assert!(!image.is_compatible(&header()));
    }

    #[test]
    fn test_stage_policy() {
        let mut image = header();
        image.stage_id = 1;
        assert_eq!(image.verify_against(&header(), StagePolicy::Informational), Ok(()));
        assert_eq!(
            image.verify_against(&header(), StagePolicy::Exact),
            Err(IdentityMismatch::Stage {
                expected: 3,
                found: 1
            })
        );
    }
}
