//! Partition and image descriptors loaded from the partition configuration.
//!
//! The configuration maps descriptor names to partition maps, in order:
//!
//! ```json
//! {
//!   "bmc": {
//!     "u-boot": { "offset": 0,   "size": 384,   "type": "legacy" },
//!     "env":    { "offset": 384, "size": 128,   "type": "ignore" },
//!     "os":     { "offset": 512, "size": 31232, "type": "fit", "num-nodes": 3 }
//!   }
//! }
//! ```
//!
//! Offsets and sizes are in KiB. An image matches a descriptor when every
//! partition passes its checker; the list matches when any descriptor does,
//! checked in file order.

use std::fs;
use std::num::NonZeroU64;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::checker::{CheckerKind, ImageChecker};
use crate::error::{CheckFailure, ConfigError};
use crate::reader::BinaryReader;

const KIB: u64 = 1024;

/// One byte range of an image plus the checker that validates it.
#[derive(Debug)]
pub struct PartitionDescriptor {
    name: String,
    offset: u64,
    size: NonZeroU64,
    kind: CheckerKind,
    checker: Box<dyn ImageChecker>,
}

impl PartitionDescriptor {
    /// Describe a partition. `offset` and `size` are in bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, offset: u64, size: NonZeroU64, kind: CheckerKind) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
            kind,
            checker: kind.build(),
        }
    }

    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offset in bytes.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Declared size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.get()
    }

    /// Checker selection.
    #[must_use]
    pub fn kind(&self) -> CheckerKind {
        self.kind
    }

    /// The bytes this partition covers in `image`.
    ///
    /// The range is clipped to the end of the image; only an offset past the
    /// end is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CheckFailure::OffsetBeyondImage`] when `offset > image.len()`.
    pub fn slice<'a>(&self, image: &'a [u8]) -> Result<&'a [u8], CheckFailure> {
        let image_len = image.len() as u64;
        let beyond = CheckFailure::OffsetBeyondImage {
            offset: self.offset,
            image_len,
        };
        if self.offset > image_len {
            return Err(beyond);
        }
        let end = self.offset.saturating_add(self.size.get()).min(image_len);
        let start = usize::try_from(self.offset).ok();
        let len = usize::try_from(end.saturating_sub(self.offset)).ok();
        start
            .zip(len)
            .and_then(|(start, len)| BinaryReader::new(image).slice(start, len))
            .ok_or(beyond)
    }

    /// Run the checker over this partition's bytes of `image`.
    ///
    /// # Errors
    ///
    /// Returns why the partition was rejected.
    pub fn check(&self, image: &[u8]) -> Result<(), CheckFailure> {
        self.checker.check(self.slice(image)?)
    }

    /// Whether this partition of `image` passes its checker.
    #[must_use]
    pub fn is_valid(&self, image: &[u8]) -> bool {
        self.check(image).is_ok()
    }
}

/// A partition rejected while checking an image descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("partition '{partition}': {reason}")]
pub struct PartitionRejection {
    /// Partition name
    pub partition: String,
    /// Checker verdict
    pub reason: CheckFailure,
}

/// An ordered set of partitions that together describe one image layout.
#[derive(Debug)]
pub struct ImageDescriptor {
    name: String,
    partitions: Vec<PartitionDescriptor>,
}

impl ImageDescriptor {
    /// Create a descriptor from its partitions.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: Vec<PartitionDescriptor>) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }

    /// Descriptor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partitions in configuration order.
    #[must_use]
    pub fn partitions(&self) -> &[PartitionDescriptor] {
        &self.partitions
    }

    /// Check every partition, stopping at the first rejection.
    ///
    /// # Errors
    ///
    /// Returns the first partition that failed and why.
    pub fn check(&self, image: &[u8]) -> Result<(), PartitionRejection> {
        for partition in &self.partitions {
            partition
                .check(image)
                .map_err(|reason| PartitionRejection {
                    partition: partition.name().to_owned(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Whether every partition accepts `image`.
    #[must_use]
    pub fn is_valid(&self, image: &[u8]) -> bool {
        match self.check(image) {
            Ok(()) => true,
            Err(rejection) => {
                debug!(descriptor = %self.name, %rejection, "image descriptor rejected");
                false
            }
        }
    }
}

/// All image layouts accepted for one component, in configuration order.
#[derive(Debug, Default)]
pub struct ImageDescriptorList {
    descriptors: Vec<ImageDescriptor>,
}

impl ImageDescriptorList {
    /// Create a list from already-built descriptors.
    #[must_use]
    pub fn new(descriptors: Vec<ImageDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Load the list from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`ImageDescriptorList::from_json`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse the list from JSON text.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a partition missing `offset`, `size` or
    /// `type`, a zero size, or an unknown checker type.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Build the list from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// As [`ImageDescriptorList::from_json`].
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let root = value
            .as_object()
            .ok_or_else(|| ConfigError::NotAnObject("<root>".to_owned()))?;

        let mut descriptors = Vec::with_capacity(root.len());
        for (descriptor_name, partitions) in root {
            let partitions = partitions
                .as_object()
                .ok_or_else(|| ConfigError::NotAnObject(descriptor_name.clone()))?;
            if partitions.is_empty() {
                return Err(ConfigError::EmptyDescriptor(descriptor_name.clone()));
            }

            let mut parsed = Vec::with_capacity(partitions.len());
            for (partition_name, entry) in partitions {
                parsed.push(parse_partition(descriptor_name, partition_name, entry)?);
            }
            descriptors.push(ImageDescriptor::new(descriptor_name.clone(), parsed));
        }
        Ok(Self { descriptors })
    }

    /// Descriptors in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.descriptors.iter()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the list has no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// First descriptor, in configuration order, that accepts `image`.
    #[must_use]
    pub fn matching(&self, image: &[u8]) -> Option<&ImageDescriptor> {
        self.descriptors.iter().find(|d| d.is_valid(image))
    }

    /// Whether any descriptor accepts `image`.
    #[must_use]
    pub fn is_valid(&self, image: &[u8]) -> bool {
        self.matching(image).is_some()
    }
}

fn parse_partition(
    descriptor: &str,
    partition: &str,
    entry: &Value,
) -> Result<PartitionDescriptor, ConfigError> {
    let fields = entry
        .as_object()
        .ok_or_else(|| ConfigError::NotAnObject(format!("{descriptor}/{partition}")))?;
    let missing = |key: &'static str| ConfigError::MissingField {
        descriptor: descriptor.to_owned(),
        partition: partition.to_owned(),
        key,
    };
    let invalid = |key: &'static str| ConfigError::InvalidField {
        descriptor: descriptor.to_owned(),
        partition: partition.to_owned(),
        key,
    };

    let offset_kib = required_u64(fields, "offset").map_err(|m| m.then(missing, invalid))?;
    let size_kib = required_u64(fields, "size").map_err(|m| m.then(missing, invalid))?;
    let kind = fields
        .get("type")
        .ok_or_else(|| missing("type"))?
        .as_str()
        .ok_or_else(|| invalid("type"))?;
    let num_nodes = match fields.get("num-nodes") {
        None => None,
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| invalid("num-nodes"))?,
        ),
    };

    let size = NonZeroU64::new(size_kib.checked_mul(KIB).ok_or_else(|| invalid("size"))?)
        .ok_or_else(|| ConfigError::ZeroSize {
            descriptor: descriptor.to_owned(),
            partition: partition.to_owned(),
        })?;
    let offset = offset_kib.checked_mul(KIB).ok_or_else(|| invalid("offset"))?;
    let checker = CheckerKind::from_type(kind, num_nodes).ok_or_else(|| {
        ConfigError::UnknownChecker {
            descriptor: descriptor.to_owned(),
            partition: partition.to_owned(),
            kind: kind.to_owned(),
        }
    })?;

    Ok(PartitionDescriptor::new(partition, offset, size, checker))
}

enum FieldProblem {
    Missing(&'static str),
    Invalid(&'static str),
}

impl FieldProblem {
    fn then(
        self,
        missing: impl Fn(&'static str) -> ConfigError,
        invalid: impl Fn(&'static str) -> ConfigError,
    ) -> ConfigError {
        match self {
            FieldProblem::Missing(key) => missing(key),
            FieldProblem::Invalid(key) => invalid(key),
        }
    }
}

fn required_u64(fields: &Map<String, Value>, key: &'static str) -> Result<u64, FieldProblem> {
    fields
        .get(key)
        .ok_or(FieldProblem::Missing(key))?
        .as_u64()
        .ok_or(FieldProblem::Invalid(key))
}
