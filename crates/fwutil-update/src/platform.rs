//! Collaborators the update engine drives but does not implement.
//!
//! A board support layer provides [`PlatformControl`] (power, GPIO, SPI
//! driver binding and the flash primitive), a [`Transport`] to bridge
//! controllers, and a [`PersistedCache`] for version strings. Tests substitute
//! recording mocks.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, TransportError};

/// Host power state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Powered on
    On,
    /// Powered off
    Off,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}

/// Power, GPIO, driver and flash primitives of the BMC platform.
///
/// Every call is blocking. `fru` is the FRU name as used on the command line.
pub trait PlatformControl: Send + Sync {
    /// Ask the host OS to shut down.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn graceful_shutdown(&self, fru: &str) -> Result<(), PlatformError>;

    /// Cut host power.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn power_off(&self, fru: &str) -> Result<(), PlatformError>;

    /// Apply host power.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn power_on(&self, fru: &str) -> Result<(), PlatformError>;

    /// Power off then on.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn power_cycle(&self, fru: &str) -> Result<(), PlatformError>;

    /// Current host power state.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn get_power_status(&self, fru: &str) -> Result<PowerState, PlatformError>;

    /// Put the management engine into recovery mode so host flash can be
    /// written.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn enter_recovery_mode(&self, fru: &str) -> Result<(), PlatformError>;

    /// Reset the FRU's controller.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn reset(&self, fru: &str) -> Result<(), PlatformError>;

    /// Drive a GPIO line.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn gpio_set(&self, line: u32, value: u8) -> Result<(), PlatformError>;

    /// Bind `device` to the driver at `driver`.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn bind_driver(&self, driver: &Path, device: &str) -> Result<(), PlatformError>;

    /// Unbind `device` from the driver at `driver`.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn unbind_driver(&self, driver: &Path, device: &str) -> Result<(), PlatformError>;

    /// Device node of the MTD partition with logical name `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::MtdNotFound`] if no partition has that name.
    fn resolve_mtd_device(&self, name: &str) -> Result<PathBuf, PlatformError>;

    /// Erase and program `device` from `image`, verifying the write.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn flash_device(&self, device: &Path, image: &Path) -> Result<(), PlatformError>;

    /// Copy the contents of `device` to `out`.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn dump_device(&self, device: &Path, out: &Path) -> Result<(), PlatformError>;

    /// Whether the FRU reports boot complete.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    fn is_boot_complete(&self, fru: &str) -> Result<bool, PlatformError>;
}

/// One firmware-update packet for a bridge controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareChunk<'a> {
    /// Bus the endpoint sits on
    pub bus: u8,
    /// Endpoint id on the bus
    pub endpoint: u8,
    /// Component the image is for
    pub component_id: u8,
    /// Offset of `data` within the image
    pub offset: u32,
    /// Packet payload
    pub data: &'a [u8],
    /// Whether this is the final packet
    pub last: bool,
    /// Whether the component is addressed by a standard PLDM descriptor
    pub standard_descriptor: bool,
}

/// Firmware versions an endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareParameters {
    /// Running version
    pub active_version: String,
    /// Version staged for next activation
    pub pending_version: Option<String>,
}

/// Send-and-acknowledge transport to bridge controllers.
pub trait Transport: Send + Sync {
    /// Deliver one chunk and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    fn send_firmware_chunk(&self, chunk: &FirmwareChunk<'_>) -> Result<(), TransportError>;

    /// Query running and pending firmware versions.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    fn get_firmware_parameters(
        &self,
        bus: u8,
        endpoint: u8,
    ) -> Result<FirmwareParameters, TransportError>;
}

/// Small persistent key/value store for cached version strings.
pub trait PersistedCache: Send + Sync {
    /// Value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns the storage failure.
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// A GPIO line and the level that selects the BMC side of a mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioLine {
    /// Line number
    pub line: u32,
    /// Level that routes the flash to the BMC
    pub active: u8,
}

impl GpioLine {
    /// Level that routes the flash back to its owner.
    #[must_use]
    pub fn inactive(&self) -> u8 {
        u8::from(self.active == 0)
    }
}

/// A SPI controller device and the driver that exposes its flash as MTD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiBinding {
    /// Driver directory under `/sys/bus/*/drivers`
    pub driver: PathBuf,
    /// Device name to bind
    pub device: String,
}
