//! Firmware image loaded for an update, and the file actually written.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fwutil_image::PayloadFile;

/// Image bytes read fully from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl FirmwareImage {
    /// Read the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: path.to_path_buf(),
            bytes: fs::read(path)?,
        })
    }

    /// Source path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Image contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// The file handed to the writer once validation is done.
#[derive(Debug)]
pub enum StagedImage {
    /// The operator's file, unchanged
    Original(PathBuf),
    /// A verified private copy of a signed image's payload
    Payload(PayloadFile),
}

impl StagedImage {
    /// Path of the file to write.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Original(path) => path,
            Self::Payload(payload) => payload.path(),
        }
    }
}
