//! Firmware image validation for BMC flash updates
//!
//! This crate decides whether a candidate image is safe to write:
//! - Legacy U-Boot (`mkimage`) header and payload CRCs
//! - FIT containers with per-image SHA-256 hashes
//! - Partition maps describing which checker covers which byte range
//! - Vendor-signed trailers carrying MD5 digests and target identity
//!
//! # Architecture
//!
//! - [`reader`]: bounds-checked big-endian reads
//! - [`checksum`]: CRC32, MD5 and SHA-256 helpers
//! - [`checker`]: the [`ImageChecker`] family and the FDT parser behind FIT
//! - [`descriptor`]: partition, image descriptor and descriptor list
//! - [`trailer`]: signed-trailer codec and payload extraction
//! - [`error`]: error types
//!
//! Everything here is a pure function of the image bytes except the trailer
//! codec, which reads the image file and writes a private payload copy.
//!
//! # Example
//!
//! ```no_run
//! use fwutil_image::prelude::*;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptors = ImageDescriptorList::from_path("/etc/image_parts.json")?;
//! let image = std::fs::read("/tmp/flash-image")?;
//!
//! match descriptors.matching(&image) {
//!     Some(layout) => println!("image matches layout '{}'", layout.name()),
//!     None => println!("image rejected"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod checker;
pub mod checksum;
pub mod descriptor;
pub mod error;
pub mod prelude;
pub mod reader;
pub mod trailer;

pub use checker::{CheckerKind, FitChecker, IgnoreChecker, ImageChecker, LegacyChecker};
pub use checksum::Md5Digest;
pub use descriptor::{ImageDescriptor, ImageDescriptorList, PartitionDescriptor, PartitionRejection};
pub use error::{CheckFailure, ConfigError, FdtError, FormatError, IdentityMismatch, Md5Stage};
pub use trailer::{
    COMPONENT_VERIFY_SKIPPED, PayloadFile, SignedHeader, SignedImageVerifier, SignedPayload,
    SignedTrailer, StagePolicy, TRAILER_LEN, VersionStyle, copy_payload,
};
