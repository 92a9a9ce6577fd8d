//! `/proc/mtd` parsing.
//!
//! ```text
//! dev:    size   erasesize  name
//! mtd0: 00060000 00010000 "u-boot"
//! mtd1: 00020000 00010000 "env"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Default location of the MTD partition table.
pub const PROC_MTD: &str = "/proc/mtd";

/// One line of `/proc/mtd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtdPartition {
    /// Kernel device name, e.g. `mtd3`
    pub device: String,
    /// Partition size in bytes
    pub size: u64,
    /// Erase block size in bytes
    pub erase_size: u64,
    /// Logical partition name
    pub name: String,
}

impl MtdPartition {
    /// Character device node for the partition.
    #[must_use]
    pub fn device_path(&self) -> PathBuf {
        Path::new("/dev").join(&self.device)
    }

    fn parse_line(line: &str) -> Option<Self> {
        let (device, rest) = line.split_once(':')?;
        let mut fields = rest.split_whitespace();
        let size = u64::from_str_radix(fields.next()?, 16).ok()?;
        let erase_size = u64::from_str_radix(fields.next()?, 16).ok()?;
        let (_, quoted) = rest.split_once('"')?;
        let name = quoted.strip_suffix('"')?;
        Some(Self {
            device: device.trim().to_owned(),
            size,
            erase_size,
            name: name.to_owned(),
        })
    }
}

/// Partitions listed in `/proc/mtd`, in kernel order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MtdTable {
    partitions: Vec<MtdPartition>,
}

impl MtdTable {
    /// Parse the text of `/proc/mtd`. The header and malformed lines are
    /// skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let partitions = text
            .lines()
            .filter(|line| !line.starts_with("dev:") && !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = MtdPartition::parse_line(line.trim());
                if parsed.is_none() {
                    debug!(line, "skipping malformed /proc/mtd line");
                }
                parsed
            })
            .collect();
        Self { partitions }
    }

    /// Read and parse the table at `path`.
    ///
    /// # Errors
    ///
    /// Propagates read errors.
    pub fn read(path: impl AsRef<Path>) -> io::Result<Self> {
        fs::read_to_string(path).map(|text| Self::parse(&text))
    }

    /// Partition whose logical name is `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&MtdPartition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Partitions in kernel order.
    #[must_use]
    pub fn partitions(&self) -> &[MtdPartition] {
        &self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "dev:    size   erasesize  name\n\
        mtd0: 00060000 00010000 \"u-boot\"\n\
        mtd1: 00020000 00010000 \"env\"\n\
        mtd2: 01f80000 00010000 \"fit\"\n\
        mtd3: 02000000 00010000 \"flash0\"\n\
        mtd4: 02000000 00010000 \"pnor\"\n";

    #[test]
    fn test_parse_sample() {
        let table = MtdTable::parse(SAMPLE);
        assert_eq!(table.partitions().len(), 5);

        let pnor = table.find("pnor");
        assert_eq!(pnor.map(|p| p.device.as_str()), Some("mtd4"));
        assert_eq!(pnor.map(|p| p.size), Some(0x0200_0000));
        assert_eq!(
            pnor.map(MtdPartition::device_path),
            Some(PathBuf::from("/dev/mtd4"))
        );
    }

    #[test]
    fn test_name_with_spaces() {
        let table = MtdTable::parse("mtd7: 00010000 00001000 \"host flash 1\"\n");
        assert_eq!(
            table.find("host flash 1").map(|p| p.erase_size),
            Some(0x1000)
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let table = MtdTable::parse("mtd0: zz 00010000 \"bad\"\nmtd1 00010000\nmtd2: 10 10 \"ok\"\n");
        assert_eq!(table.partitions().len(), 1);
        assert!(table.find("ok").is_some());
        assert!(table.find("bad").is_none());
    }
}
