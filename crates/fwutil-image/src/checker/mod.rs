//! Partition image checkers.
//!
//! A checker is a pure function from a partition's bytes to accept/reject.
//! Checkers never mutate the buffer and treat any out-of-range access as a
//! rejection rather than an error that aborts the scan.

pub mod fdt;
pub mod fit;
pub mod legacy;

use std::fmt;

use crate::error::CheckFailure;

pub use fit::{DEFAULT_MIN_VALID_IMAGES, FitChecker};
pub use legacy::{LEGACY_HEADER_LEN, LEGACY_MAGIC, LegacyChecker, LegacyHeader};

/// Validation strategy for one partition's bytes.
pub trait ImageChecker: fmt::Debug + Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Check `bytes`, reporting why they were rejected.
    ///
    /// # Errors
    ///
    /// Returns the first rule the bytes violate.
    fn check(&self, bytes: &[u8]) -> Result<(), CheckFailure>;

    /// Whether `bytes` pass this checker.
    fn is_valid(&self, bytes: &[u8]) -> bool {
        self.check(bytes).is_ok()
    }
}

/// Accepts any bytes. Used for partitions with no verifiable structure.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreChecker;

impl ImageChecker for IgnoreChecker {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn check(&self, _bytes: &[u8]) -> Result<(), CheckFailure> {
        Ok(())
    }
}

/// Checker selection as written in the partition configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerKind {
    /// `"ignore"`
    Ignore,
    /// `"legacy"`
    Legacy,
    /// `"fit"`, optionally with `"num-nodes"`
    Fit {
        /// Minimum number of image nodes whose hash must verify
        min_valid_images: u32,
    },
}

impl CheckerKind {
    /// Map a configuration `type` string to a kind.
    ///
    /// `num_nodes` only applies to `"fit"` and defaults to
    /// [`DEFAULT_MIN_VALID_IMAGES`].
    #[must_use]
    pub fn from_type(kind: &str, num_nodes: Option<u32>) -> Option<Self> {
        match kind {
            "ignore" => Some(Self::Ignore),
            "legacy" => Some(Self::Legacy),
            "fit" => Some(Self::Fit {
                min_valid_images: num_nodes.unwrap_or(DEFAULT_MIN_VALID_IMAGES),
            }),
            _ => None,
        }
    }

    /// Instantiate the checker.
    #[must_use]
    pub fn build(self) -> Box<dyn ImageChecker> {
        match self {
            Self::Ignore => Box::new(IgnoreChecker),
            Self::Legacy => Box::new(LegacyChecker),
            Self::Fit { min_valid_images } => Box::new(FitChecker::new(min_valid_images)),
        }
    }
}

impl fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Legacy => write!(f, "legacy"),
            Self::Fit { min_valid_images } => write!(f, "fit(num-nodes={min_valid_images})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_accepts_anything() {
        assert!(IgnoreChecker.is_valid(&[]));
        assert!(IgnoreChecker.is_valid(&[0xFF; 17]));
    }

    #[test]
    fn test_from_type() {
        assert_eq!(CheckerKind::from_type("ignore", None), Some(CheckerKind::Ignore));
        assert_eq!(CheckerKind::from_type("legacy", Some(4)), Some(CheckerKind::Legacy));
        assert_eq!(
            CheckerKind::from_type("fit", None),
            Some(CheckerKind::Fit { min_valid_images: 1 })
        );
        assert_eq!(
            CheckerKind::from_type("fit", Some(3)),
            Some(CheckerKind::Fit { min_valid_images: 3 })
        );
        assert_eq!(CheckerKind::from_type("FIT", None), None);
        assert_eq!(CheckerKind::from_type("ubi", None), None);
    }

    #[test]
    fn test_build_names() {
        assert_eq!(CheckerKind::Ignore.build().name(), "ignore");
        assert_eq!(CheckerKind::Legacy.build().name(), "legacy");
        assert_eq!(CheckerKind::Fit { min_valid_images: 2 }.build().name(), "fit");
    }
}
