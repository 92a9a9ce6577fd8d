//! Component identity and capabilities.

use std::fmt;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UpdateError;
use crate::state::{UpdateReport, UpdateState};

/// Registry key of a component: FRU, optional board, component name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    /// FRU the component belongs to
    pub fru: String,
    /// Board within the FRU, for multi-board FRUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    /// Component name
    pub name: String,
}

impl ComponentId {
    /// Id without a board.
    #[must_use]
    pub fn new(fru: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            fru: fru.into(),
            board: None,
            name: name.into(),
        }
    }

    /// Same id on `board`.
    #[must_use]
    pub fn on_board(mut self, board: impl Into<String>) -> Self {
        self.board = Some(board.into());
        self
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.board {
            Some(board) => write!(f, "{}/{}/{}", self.fru, board, self.name),
            None => write!(f, "{}/{}", self.fru, self.name),
        }
    }
}

/// Component variants known to the component table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Plain MTD partition
    Mtd,
    /// MTD behind a SPI driver that must be bound first
    SpiMtd,
    /// MTD behind a GPIO mux and a SPI driver
    GpioSwitchedSpiMtd,
    /// Host BIOS flash
    Bios,
    /// BMC flash
    Bmc,
    /// Component updated through a bridge controller
    Pldm,
    /// Voltage regulator behind a bridge controller
    Vr,
    /// CPLD behind a bridge controller
    Cpld,
    /// Network controller
    Nic,
    /// TPM, version only
    Tpm,
    /// Another name for a registered component
    Alias,
}

impl ComponentKind {
    /// Kind name as used in the component table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mtd => "mtd",
            Self::SpiMtd => "spi_mtd",
            Self::GpioSwitchedSpiMtd => "gpio_switched_spi_mtd",
            Self::Bios => "bios",
            Self::Bmc => "bmc",
            Self::Pldm => "pldm",
            Self::Vr => "vr",
            Self::Cpld => "cpld",
            Self::Nic => "nic",
            Self::Tpm => "tpm",
            Self::Alias => "alias",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A firmware-bearing part of the platform.
///
/// Every capability defaults to "not supported"; variants override what they
/// can do.
pub trait Component: Send + Sync {
    /// Registry key.
    fn id(&self) -> &ComponentId;

    /// Variant.
    fn kind(&self) -> ComponentKind;

    /// Validate and write `image`.
    fn update(&self, _image: &Path) -> UpdateReport {
        UpdateReport::not_supported(self.id(), "update", false)
    }

    /// Write `image` without validation.
    fn force_update(&self, _image: &Path) -> UpdateReport {
        UpdateReport::not_supported(self.id(), "force update", true)
    }

    /// Copy the installed firmware to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotSupported`] unless overridden.
    fn dump(&self, _out: &Path) -> Result<(), UpdateError> {
        Err(self.not_supported("dump"))
    }

    /// Installed firmware version.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotSupported`] unless overridden.
    fn get_version(&self) -> Result<String, UpdateError> {
        Err(self.not_supported("version"))
    }

    /// Write a `<component> Version: <version>` line to `out`, or `NA` when
    /// the version cannot be read.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::NotSupported`] when the component has no
    /// version at all; write failures are I/O errors.
    fn print_version(&self, out: &mut dyn io::Write) -> Result<(), UpdateError> {
        let label = version_label(self.id());
        let line = match self.get_version() {
            Ok(version) => format!("{label} Version: {version}"),
            Err(e @ UpdateError::NotSupported { .. }) => return Err(e),
            Err(e) => {
                debug!(component = %self.id(), error = %e, "version unavailable");
                format!("{label} Version: NA")
            }
        };
        writeln!(out, "{line}").map_err(|source| UpdateError::Io {
            state: UpdateState::Idle,
            path: "<stdout>".into(),
            source,
        })
    }

    /// Error for an operation this component does not implement.
    fn not_supported(&self, operation: &'static str) -> UpdateError {
        UpdateError::NotSupported {
            component: self.id().to_string(),
            operation,
        }
    }
}

fn version_label(id: &ComponentId) -> String {
    let name = id.name.to_uppercase();
    match &id.board {
        Some(board) => format!("{} {}", board.to_uppercase(), name),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FwStatus;

    struct VersionOnly(ComponentId, Result<&'static str, ()>);

    impl Component for VersionOnly {
        fn id(&self) -> &ComponentId {
            &self.0
        }

        fn kind(&self) -> ComponentKind {
            ComponentKind::Tpm
        }

        fn get_version(&self) -> Result<String, UpdateError> {
            self.1.map(str::to_owned).map_err(|()| UpdateError::HardwareTimeout {
                state: UpdateState::Idle,
                operation: "version read",
            })
        }
    }

    #[test]
    fn test_display_with_and_without_board() {
        assert_eq!(ComponentId::new("slot1", "bios").to_string(), "slot1/bios");
        assert_eq!(
            ComponentId::new("slot1", "vr").on_board("1ou").to_string(),
            "slot1/1ou/vr"
        );
    }

    #[test]
    fn test_defaults_are_not_supported() {
        let component = VersionOnly(ComponentId::new("slot1", "tpm"), Ok("7.2"));
        let report = component.update(Path::new("/tmp/none"));
        assert_eq!(report.status(), FwStatus::NotSupported);
        assert!(component.force_update(Path::new("/tmp/none")).forced());
        assert!(matches!(
            component.dump(Path::new("/tmp/out")),
            Err(UpdateError::NotSupported { operation: "dump", .. })
        ));
    }

    #[test]
    fn test_print_version() -> Result<(), UpdateError> {
        let mut out = Vec::new();
        VersionOnly(ComponentId::new("slot1", "tpm"), Ok("7.2.2.0")).print_version(&mut out)?;
        VersionOnly(ComponentId::new("slot1", "cpld").on_board("1ou"), Err(())).print_version(&mut out)?;
        assert_eq!(
            String::from_utf8_lossy(&out),
            "TPM Version: 7.2.2.0\n1OU CPLD Version: NA\n"
        );
        Ok(())
    }
}
