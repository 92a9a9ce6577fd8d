//! Minimal flattened device tree reader.
//!
//! Parses the header, walks the structure block and resolves property names
//! from the strings block into a small borrowed tree. Only what FIT
//! validation needs is modelled: no phandles, no memory reservation map.

use crate::error::FdtError;
use crate::reader::{BinaryReader, widen};

/// Header magic.
pub const FDT_MAGIC: u32 = 0xd00d_feed;
/// Size of the v17 header in bytes.
pub const FDT_HEADER_SIZE: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const MAX_DEPTH: usize = 32;

/// Fields of the FDT header that locate the blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdtHeader {
    /// Total size of the blob in bytes
    pub total_size: u32,
    /// Offset of the structure block
    pub off_dt_struct: u32,
    /// Offset of the strings block
    pub off_dt_strings: u32,
    /// Format version
    pub version: u32,
    /// Size of the strings block
    pub size_dt_strings: u32,
    /// Size of the structure block
    pub size_dt_struct: u32,
}

impl FdtHeader {
    /// Parse and sanity-check the header at the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic is wrong or the declared blocks do not
    /// fit inside `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, FdtError> {
        let reader = BinaryReader::new(bytes);
        let word = |offset: usize| reader.be_u32(offset).ok_or(FdtError::Truncated);

        let magic = word(0)?;
        if magic != FDT_MAGIC {
            return Err(FdtError::BadMagic(magic));
        }
        let header = Self {
            total_size: word(4)?,
            off_dt_struct: word(8)?,
            off_dt_strings: word(12)?,
            version: word(20)?,
            size_dt_strings: word(32)?,
            size_dt_struct: word(36)?,
        };

        if widen(header.total_size) > bytes.len() {
            return Err(FdtError::Truncated);
        }
        if widen(header.total_size) < FDT_HEADER_SIZE {
            return Err(FdtError::BadOffset);
        }
        Ok(header)
    }
}

/// A property: name plus raw value bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    name: &'a str,
    value: &'a [u8],
}

impl<'a> Property<'a> {
    /// Property name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Raw value.
    #[must_use]
    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    /// Value as a single big-endian cell.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        if self.value.len() != 4 {
            return None;
        }
        BinaryReader::new(self.value).be_u32(0)
    }

    /// Value as a NUL-terminated string.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        BinaryReader::new(self.value).cstr(0)
    }
}

/// A node with its properties and children in blob order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    name: &'a str,
    properties: Vec<Property<'a>>,
    children: Vec<Node<'a>>,
}

impl<'a> Node<'a> {
    fn new(name: &'a str) -> Self {
        Self {
            name,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Node name including any `@unit` suffix.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Direct children.
    pub fn children(&self) -> impl Iterator<Item = &Node<'a>> {
        self.children.iter()
    }

    /// First child with exactly this name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Node<'a>> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Properties in blob order.
    pub fn properties(&self) -> impl Iterator<Item = &Property<'a>> {
        self.properties.iter()
    }

    /// Property lookup by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property<'a>> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A parsed device tree borrowing from the input blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fdt<'a> {
    header: FdtHeader,
    root: Node<'a>,
}

impl<'a> Fdt<'a> {
    /// Parse a device tree from the start of `bytes`.
    ///
    /// Bytes past the header's `total_size` are ignored; FIT images with
    /// external data keep their payloads there.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtError`] for any structural problem. Malformed input
    /// never panics.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FdtError> {
        let header = FdtHeader::parse(bytes)?;
        let blob = BinaryReader::new(bytes);

        let struct_len = if header.size_dt_struct == 0 {
            widen(header.total_size)
                .checked_sub(widen(header.off_dt_struct))
                .ok_or(FdtError::BadOffset)?
        } else {
            widen(header.size_dt_struct)
        };
        let structure = blob
            .slice(widen(header.off_dt_struct), struct_len)
            .ok_or(FdtError::BadOffset)?;
        let strings = blob
            .slice(widen(header.off_dt_strings), widen(header.size_dt_strings))
            .ok_or(FdtError::BadOffset)?;

        let root = walk_structure(BinaryReader::new(structure), BinaryReader::new(strings))?;
        Ok(Self { header, root })
    }

    /// Parsed header.
    #[must_use]
    pub fn header(&self) -> &FdtHeader {
        &self.header
    }

    /// Root node.
    #[must_use]
    pub fn root(&self) -> &Node<'a> {
        &self.root
    }
}

fn align4(value: usize) -> Option<usize> {
    Some(value.checked_add(3)? & !3)
}

fn walk_structure<'a>(
    structure: BinaryReader<'a>,
    strings: BinaryReader<'a>,
) -> Result<Node<'a>, FdtError> {
    let mut stack: Vec<Node<'a>> = Vec::new();
    let mut root: Option<Node<'a>> = None;
    let mut cursor = 0usize;

    loop {
        let token_offset = cursor;
        let token = structure.be_u32(cursor).ok_or(FdtError::Unterminated)?;
        cursor = cursor.checked_add(4).ok_or(FdtError::Truncated)?;

        match token {
            FDT_BEGIN_NODE => {
                if root.is_some() {
                    return Err(FdtError::UnexpectedToken {
                        token,
                        offset: token_offset,
                    });
                }
                if stack.len() >= MAX_DEPTH {
                    return Err(FdtError::TooDeep(MAX_DEPTH));
                }
                let name = structure.cstr(cursor).ok_or(FdtError::BadName(cursor))?;
                cursor = cursor
                    .checked_add(name.len())
                    .and_then(|c| c.checked_add(1))
                    .and_then(align4)
                    .ok_or(FdtError::Truncated)?;
                stack.push(Node::new(name));
            }
            FDT_END_NODE => {
                let node = stack.pop().ok_or(FdtError::UnexpectedToken {
                    token,
                    offset: token_offset,
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            FDT_PROP => {
                let len = structure.be_u32(cursor).ok_or(FdtError::Truncated)?;
                let name_offset = structure
                    .be_u32(cursor.checked_add(4).ok_or(FdtError::Truncated)?)
                    .ok_or(FdtError::Truncated)?;
                let value_offset = cursor.checked_add(8).ok_or(FdtError::Truncated)?;
                let value = structure
                    .slice(value_offset, widen(len))
                    .ok_or(FdtError::Truncated)?;
                let name = strings
                    .cstr(widen(name_offset))
                    .ok_or(FdtError::BadName(token_offset))?;
                let node = stack.last_mut().ok_or(FdtError::UnexpectedToken {
                    token,
                    offset: token_offset,
                })?;
                node.properties.push(Property { name, value });
                cursor = value_offset
                    .checked_add(value.len())
                    .and_then(align4)
                    .ok_or(FdtError::Truncated)?;
            }
            FDT_NOP => {}
            FDT_END => break,
            other => {
                return Err(FdtError::UnexpectedToken {
                    token: other,
                    offset: token_offset,
                });
            }
        }
    }

    if !stack.is_empty() {
        return Err(FdtError::Unterminated);
    }
    root.ok_or(FdtError::Unterminated)
}
