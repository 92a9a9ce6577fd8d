//! FIT (flattened image tree) checker.
//!
//! A FIT is an FDT with an `images` node whose children carry either inline
//! `data` or a `data-position`/`data-size` pair pointing into the blob, plus
//! a `hash@1` subnode holding a SHA-256 digest of that data.

use thiserror::Error;
use tracing::debug;

use crate::checksum::{Sha256Digest, sha256};
use crate::error::CheckFailure;
use crate::reader::{BinaryReader, widen};

use super::ImageChecker;
use super::fdt::{Fdt, Node};

/// Image nodes that must verify when the configuration omits `num-nodes`.
pub const DEFAULT_MIN_VALID_IMAGES: u32 = 1;

const HASH_NODE: &str = "hash@1";
const HASH_ALGO: &str = "sha256";

/// Why a single image node did not verify. Only logged; the partition
/// verdict is based on the count of verified nodes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageNodeRejection {
    /// Neither `data` nor a `data-position`/`data-size` pair
    #[error("no data")]
    NoData,
    /// External data range falls outside the partition
    #[error("external data at {position}+{size} is outside the partition")]
    DataOutOfRange {
        /// `data-position`
        position: u32,
        /// `data-size`
        size: u32,
    },
    /// No `hash@1` subnode
    #[error("no hash@1 node")]
    NoHash,
    /// `algo` is missing or not `sha256`
    #[error("unsupported hash algorithm {0:?}")]
    Algorithm(Option<String>),
    /// `value` is missing or not 32 bytes
    #[error("malformed hash value")]
    BadValue,
    /// Digest does not match the data
    #[error("sha256 mismatch")]
    Mismatch,
}

/// Accepts a FIT whose verified image count reaches `min_valid_images`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitChecker {
    min_valid_images: u32,
}

impl Default for FitChecker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_VALID_IMAGES)
    }
}

impl FitChecker {
    /// Create a checker requiring `min_valid_images` verified image nodes.
    #[must_use]
    pub fn new(min_valid_images: u32) -> Self {
        Self { min_valid_images }
    }

    /// Required verified image count.
    #[must_use]
    pub fn min_valid_images(&self) -> u32 {
        self.min_valid_images
    }

    /// Count the image nodes under `/images` whose hash verifies.
    ///
    /// # Errors
    ///
    /// Fails if `bytes` is not a device tree or lacks `images` or
    /// `configurations`.
    pub fn count_valid_images(&self, bytes: &[u8]) -> Result<u32, CheckFailure> {
        let fdt = Fdt::parse(bytes)?;
        let root = fdt.root();
        let images = root.child("images").ok_or(CheckFailure::MissingNode("images"))?;
        root.child("configurations")
            .ok_or(CheckFailure::MissingNode("configurations"))?;

        let mut valid = 0u32;
        for image in images.children() {
            match verify_image(image, bytes) {
                Ok(()) => valid = valid.saturating_add(1),
                Err(reason) => debug!(image = image.name(), %reason, "FIT image node rejected"),
            }
        }
        Ok(valid)
    }
}

impl ImageChecker for FitChecker {
    fn name(&self) -> &'static str {
        "fit"
    }

    fn check(&self, bytes: &[u8]) -> Result<(), CheckFailure> {
        let found = self.count_valid_images(bytes)?;
        if found < self.min_valid_images {
            return Err(CheckFailure::NotEnoughImages {
                wanted: self.min_valid_images,
                found,
            });
        }
        Ok(())
    }
}

fn image_data<'a>(image: &Node<'a>, blob: &'a [u8]) -> Result<&'a [u8], ImageNodeRejection> {
    if let Some(data) = image.property("data") {
        return Ok(data.value());
    }
    let position = image.property("data-position").and_then(|p| p.as_u32());
    let size = image.property("data-size").and_then(|p| p.as_u32());
    match (position, size) {
        (Some(position), Some(size)) => BinaryReader::new(blob)
            .slice(widen(position), widen(size))
            .ok_or(ImageNodeRejection::DataOutOfRange { position, size }),
        _ => Err(ImageNodeRejection::NoData),
    }
}

fn expected_digest(image: &Node<'_>) -> Result<Sha256Digest, ImageNodeRejection> {
    let hash = image.child(HASH_NODE).ok_or(ImageNodeRejection::NoHash)?;
    let algo = hash.property("algo").and_then(|p| p.as_str());
    if algo != Some(HASH_ALGO) {
        return Err(ImageNodeRejection::Algorithm(algo.map(str::to_owned)));
    }
    hash.property("value")
        .and_then(|p| p.value().try_into().ok())
        .ok_or(ImageNodeRejection::BadValue)
}

fn verify_image(image: &Node<'_>, blob: &[u8]) -> Result<(), ImageNodeRejection> {
    let data = image_data(image, blob)?;
    let expected = expected_digest(image)?;
    if sha256(data) != expected {
        return Err(ImageNodeRejection::Mismatch);
    }
    Ok(())
}
