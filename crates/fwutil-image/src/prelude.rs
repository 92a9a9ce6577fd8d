//! Convenience re-exports for common image validation types

pub use crate::checker::{
    CheckerKind, DEFAULT_MIN_VALID_IMAGES, FitChecker, IgnoreChecker, ImageChecker,
    LEGACY_HEADER_LEN, LEGACY_MAGIC, LegacyChecker, LegacyHeader,
};
pub use crate::checksum::{Md5Digest, Sha256Digest};
pub use crate::descriptor::{
    ImageDescriptor, ImageDescriptorList, PartitionDescriptor, PartitionRejection,
};
pub use crate::error::{
    CheckFailure, ConfigError, FdtError, FormatError, IdentityMismatch, Md5Stage,
};
pub use crate::trailer::{
    COMPONENT_VERIFY_SKIPPED, PayloadFile, SignedHeader, SignedImageVerifier, SignedPayload,
    SignedTrailer, StagePolicy, TRAILER_LEN, VersionStyle, copy_payload,
};
