//! Error types for image validation and partition configuration

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the partition/descriptor configuration.
///
/// All of these are fatal at construction time; an invalid configuration
/// never yields a partially built descriptor list.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read partition config {}: {source}", .path.display())]
    Io {
        /// Path that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration is not valid JSON
    #[error("Malformed partition config: {0}")]
    Json(#[from] serde_json::Error),

    /// A descriptor or partition entry is not a JSON object
    #[error("Expected a JSON object for '{0}'")]
    NotAnObject(String),

    /// A descriptor lists no partitions
    #[error("Image descriptor '{0}' has no partitions")]
    EmptyDescriptor(String),

    /// A partition entry lacks a required key
    #[error("Partition '{descriptor}/{partition}' is missing required key '{key}'")]
    MissingField {
        /// Descriptor the partition belongs to
        descriptor: String,
        /// Partition name
        partition: String,
        /// Missing key
        key: &'static str,
    },

    /// A partition key is present but has the wrong JSON type or range
    #[error("Partition '{descriptor}/{partition}' has an invalid value for '{key}'")]
    InvalidField {
        /// Descriptor the partition belongs to
        descriptor: String,
        /// Partition name
        partition: String,
        /// Offending key
        key: &'static str,
    },

    /// A partition declares a size of zero
    #[error("Partition '{descriptor}/{partition}' has zero size")]
    ZeroSize {
        /// Descriptor the partition belongs to
        descriptor: String,
        /// Partition name
        partition: String,
    },

    /// A partition names a checker type that does not exist
    #[error("Partition '{descriptor}/{partition}' has unknown type '{kind}'")]
    UnknownChecker {
        /// Descriptor the partition belongs to
        descriptor: String,
        /// Partition name
        partition: String,
        /// Type string found in the configuration
        kind: String,
    },
}

/// Structural problems found while parsing a flattened device tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FdtError {
    /// Blob shorter than the header or its declared total size
    #[error("Device tree truncated")]
    Truncated,

    /// Header magic is not `0xd00dfeed`
    #[error("Bad device tree magic 0x{0:08x}")]
    BadMagic(u32),

    /// Header offsets point outside the blob
    #[error("Device tree header offsets out of range")]
    BadOffset,

    /// Unknown or misplaced structure token
    #[error("Unexpected token 0x{token:x} at structure offset {offset}")]
    UnexpectedToken {
        /// Token value
        token: u32,
        /// Byte offset within the structure block
        offset: usize,
    },

    /// Node or property name is not a valid NUL-terminated string
    #[error("Invalid name at structure offset {0}")]
    BadName(usize),

    /// Structure block ended with open nodes
    #[error("Device tree structure block is unterminated")]
    Unterminated,

    /// Nodes nested beyond the supported depth
    #[error("Device tree nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Why an image checker rejected a byte range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    /// Not enough bytes for the structure being checked
    #[error("Image too short: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: u64,
        /// Bytes present
        available: u64,
    },

    /// Legacy header magic mismatch
    #[error("Bad image magic 0x{found:08x}")]
    BadMagic {
        /// Magic value found
        found: u32,
    },

    /// Legacy header CRC mismatch
    #[error("Header CRC mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    HeaderCrc {
        /// CRC stored in the header
        stored: u32,
        /// CRC computed over the header
        computed: u32,
    },

    /// Legacy payload CRC mismatch
    #[error("Data CRC mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    DataCrc {
        /// CRC stored in the header
        stored: u32,
        /// CRC computed over the payload
        computed: u32,
    },

    /// FIT container is not a well-formed device tree
    #[error("Invalid FIT: {0}")]
    Fdt(#[from] FdtError),

    /// FIT container lacks a mandatory top-level node
    #[error("FIT is missing the '{0}' node")]
    MissingNode(&'static str),

    /// Fewer FIT image nodes verified than required
    #[error("Not enough image nodes validated: want {wanted} got {found}")]
    NotEnoughImages {
        /// Required count
        wanted: u32,
        /// Verified count
        found: u32,
    },

    /// Partition starts past the end of the image
    #[error("Partition offset {offset} is beyond image end {image_len}")]
    OffsetBeyondImage {
        /// Partition offset in bytes
        offset: u64,
        /// Image length in bytes
        image_len: u64,
    },
}

/// Which of the two trailer digests failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Md5Stage {
    /// Digest over the payload (everything before the trailer)
    Payload,
    /// Digest over the first 48 bytes of the trailer
    Trailer,
}

impl fmt::Display for Md5Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Md5Stage::Payload => write!(f, "MD5-1"),
            Md5Stage::Trailer => write!(f, "MD5-2"),
        }
    }
}

/// Signed image identity does not match the update target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityMismatch {
    /// Project code differs
    #[error("Project name mismatch: image is for '{found}', target is '{expected}'")]
    Project {
        /// Target project code
        expected: String,
        /// Project code in the image
        found: String,
    },

    /// Board id differs
    #[error("Board id mismatch: image is for board {found:#04x}, target is {expected:#04x}")]
    Board {
        /// Target board id
        expected: u8,
        /// Board id in the image
        found: u8,
    },

    /// Stage differs while the target pins one
    #[error(
        "Stage mismatch: image is for stage {found}, target is {expected}; \
         to force the update, please use the --force option"
    )]
    Stage {
        /// Target stage
        expected: u8,
        /// Stage in the image
        found: u8,
    },

    /// Component id differs
    #[error("Component id mismatch: image is for component {found:#04x}, target is {expected:#04x}")]
    Component {
        /// Target component id
        expected: u8,
        /// Component id in the image
        found: u8,
    },

    /// Vendor id differs
    #[error("Vendor id mismatch: image is from vendor {found:#04x}, target expects {expected:#04x}")]
    Vendor {
        /// Target vendor id
        expected: u8,
        /// Vendor id in the image
        found: u8,
    },
}

/// Errors from the signed-trailer codec.
#[derive(Error, Debug)]
pub enum FormatError {
    /// Image file could not be read or the payload copy could not be written
    #[error("Failed to access image {}: {source}", .path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is smaller than the trailer
    #[error("Image is {size} bytes, smaller than the signed trailer")]
    TooSmall {
        /// File size in bytes
        size: u64,
    },

    /// One of the two trailer digests failed
    #[error("{stage} checksum incorrect, please check the image")]
    DigestMismatch {
        /// Failing digest
        stage: Md5Stage,
    },

    /// Requested payload copy is larger than the file
    #[error("Payload size {requested} exceeds image size {available}")]
    PayloadTooLarge {
        /// Bytes requested
        requested: u64,
        /// Bytes in the file
        available: u64,
    },

    /// Image identity does not match the target
    #[error(transparent)]
    Identity(#[from] IdentityMismatch),
}

impl FormatError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FormatError::Io {
            path: path.into(),
            source,
        }
    }
}
