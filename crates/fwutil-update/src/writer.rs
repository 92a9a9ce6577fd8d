//! Strategies for the `Writing` state.
//!
//! [`MtdWriter`] programs a flash partition through the platform's flash
//! primitive, optionally behind a [`GpioSwitchedSpiWriter`] that routes the
//! flash to the BMC for the duration of the write. [`PldmWriter`] streams the
//! image to a bridge controller in bounded chunks.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PlatformError, UpdateError};
use crate::image::FirmwareImage;
use crate::platform::{
    FirmwareChunk, GpioLine, PersistedCache, PlatformControl, SpiBinding, Transport,
};
use crate::retry::RetryPolicy;
use crate::state::UpdateState;

/// Largest payload of one bridge-controller update packet.
pub const BIC_MAX_CHUNK: usize = 224;
/// Packets never straddle a block of this size.
pub const BIC_BLOCK_SIZE: usize = 64 * 1024;

/// Programs an image during the `Writing` state.
pub trait FirmwareWriter: fmt::Debug + Send + Sync {
    /// Write the file at `image`.
    ///
    /// # Errors
    ///
    /// Returns the failure, tagged with [`UpdateState::Writing`].
    fn write(&self, image: &Path) -> Result<(), UpdateError>;
}

/// Routes a flash chip to the BMC: drives the mux GPIO, then binds the SPI
/// driver that exposes it as MTD.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpioSwitchedSpiWriter {
    gpio: Option<GpioLine>,
    spi: Option<SpiBinding>,
}

impl GpioSwitchedSpiWriter {
    /// Switch with both a mux GPIO and a driver binding.
    #[must_use]
    pub fn new(gpio: Option<GpioLine>, spi: Option<SpiBinding>) -> Self {
        Self { gpio, spi }
    }

    /// Take the flash. Released when the guard drops, in reverse order.
    ///
    /// # Errors
    ///
    /// Returns the first platform failure; anything already acquired is
    /// released before returning.
    pub fn acquire<'a>(
        &'a self,
        platform: &'a dyn PlatformControl,
    ) -> Result<SpiSwitchGuard<'a>, PlatformError> {
        let mut guard = SpiSwitchGuard {
            platform,
            gpio: None,
            spi: None,
        };
        if let Some(gpio) = &self.gpio {
            platform.gpio_set(gpio.line, gpio.active)?;
            guard.gpio = Some(gpio);
        }
        if let Some(spi) = &self.spi {
            platform.bind_driver(&spi.driver, &spi.device)?;
            guard.spi = Some(spi);
        }
        debug!(gpio = ?self.gpio, spi = ?self.spi, "flash routed to BMC");
        Ok(guard)
    }
}

/// Holds the flash on the BMC side; unbinds and switches back on drop.
pub struct SpiSwitchGuard<'a> {
    platform: &'a dyn PlatformControl,
    gpio: Option<&'a GpioLine>,
    spi: Option<&'a SpiBinding>,
}

impl fmt::Debug for SpiSwitchGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpiSwitchGuard")
            .field("gpio", &self.gpio)
            .field("spi", &self.spi)
            .finish_non_exhaustive()
    }
}

impl Drop for SpiSwitchGuard<'_> {
    fn drop(&mut self) {
        if let Some(spi) = self.spi.take()
            && let Err(e) = self.platform.unbind_driver(&spi.driver, &spi.device)
        {
            warn!(device = %spi.device, error = %e, "failed to unbind SPI driver");
        }
        if let Some(gpio) = self.gpio.take()
            && let Err(e) = self.platform.gpio_set(gpio.line, gpio.inactive())
        {
            warn!(line = gpio.line, error = %e, "failed to release flash mux");
        }
    }
}

/// Writes an MTD partition through [`PlatformControl::flash_device`].
#[derive(Clone)]
pub struct MtdWriter {
    platform: Arc<dyn PlatformControl>,
    mtd: String,
    switch: Option<GpioSwitchedSpiWriter>,
}

impl fmt::Debug for MtdWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtdWriter")
            .field("mtd", &self.mtd)
            .field("switch", &self.switch)
            .finish_non_exhaustive()
    }
}

impl MtdWriter {
    /// Writer for the partition named `mtd`.
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformControl>, mtd: impl Into<String>) -> Self {
        Self {
            platform,
            mtd: mtd.into(),
            switch: None,
        }
    }

    /// Route the flash through `switch` while writing or dumping.
    #[must_use]
    pub fn with_switch(mut self, switch: GpioSwitchedSpiWriter) -> Self {
        self.switch = Some(switch);
        self
    }

    /// Logical MTD partition name.
    #[must_use]
    pub fn mtd(&self) -> &str {
        &self.mtd
    }

    fn with_device<T>(
        &self,
        state: UpdateState,
        op: impl FnOnce(&Path) -> Result<T, PlatformError>,
    ) -> Result<T, UpdateError> {
        let to_error = UpdateError::platform(state);
        let _switch = match &self.switch {
            Some(switch) => Some(switch.acquire(&*self.platform).map_err(&to_error)?),
            None => None,
        };
        let device = self
            .platform
            .resolve_mtd_device(&self.mtd)
            .map_err(&to_error)?;
        op(&device).map_err(&to_error)
    }

    /// Copy the partition contents to `out`.
    ///
    /// # Errors
    ///
    /// Returns the platform failure.
    pub fn dump(&self, out: &Path) -> Result<(), UpdateError> {
        self.with_device(UpdateState::Idle, |device| {
            info!(mtd = %self.mtd, device = %device.display(), out = %out.display(), "dumping flash");
            self.platform.dump_device(device, out)
        })
    }
}

impl FirmwareWriter for MtdWriter {
    fn write(&self, image: &Path) -> Result<(), UpdateError> {
        self.with_device(UpdateState::Writing, |device| {
            info!(mtd = %self.mtd, device = %device.display(), "flashing");
            self.platform.flash_device(device, image)
        })
    }
}

/// One packet of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Offset into the image
    pub offset: usize,
    /// Bytes in the packet
    pub len: usize,
    /// Whether this packet ends the image
    pub last: bool,
}

/// Packet layout for an image of `total` bytes: at most [`BIC_MAX_CHUNK`]
/// bytes each, never crossing a [`BIC_BLOCK_SIZE`] boundary, the final one
/// flagged.
#[must_use]
pub fn chunk_plan(total: usize) -> ChunkPlan {
    ChunkPlan { offset: 0, total }
}

/// Iterator returned by [`chunk_plan`].
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    offset: usize,
    total: usize,
}

impl Iterator for ChunkPlan {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let remaining = self.total.checked_sub(self.offset).filter(|&r| r > 0)?;
        let to_boundary = BIC_BLOCK_SIZE - self.offset % BIC_BLOCK_SIZE;
        let len = BIC_MAX_CHUNK.min(to_boundary).min(remaining);
        let span = ChunkSpan {
            offset: self.offset,
            len,
            last: len == remaining,
        };
        self.offset += len;
        Some(span)
    }
}

/// Bridge-controller addressing for a PLDM component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PldmTarget {
    /// Bus number
    pub bus: u8,
    /// Endpoint id
    pub endpoint: u8,
    /// Component id sent with every chunk
    pub component_id: u8,
    /// Whether the component uses a standard PLDM descriptor
    pub standard_descriptor: bool,
}

/// Streams an image to a bridge controller through a [`Transport`].
#[derive(Clone)]
pub struct PldmWriter {
    transport: Arc<dyn Transport>,
    target: PldmTarget,
    retry: RetryPolicy,
    version_cache: Option<(Arc<dyn PersistedCache>, String)>,
}

impl fmt::Debug for PldmWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PldmWriter")
            .field("target", &self.target)
            .field("retry", &self.retry)
            .field("version_key", &self.version_cache.as_ref().map(|(_, key)| key))
            .finish_non_exhaustive()
    }
}

impl PldmWriter {
    /// Writer for `target` with the default per-chunk retry budget.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, target: PldmTarget) -> Self {
        Self {
            transport,
            target,
            retry: RetryPolicy::default(),
            version_cache: None,
        }
    }

    /// Per-chunk retry budget.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// After a successful transfer, store the endpoint's reported version
    /// under `key`.
    #[must_use]
    pub fn with_version_cache(mut self, cache: Arc<dyn PersistedCache>, key: impl Into<String>) -> Self {
        self.version_cache = Some((cache, key.into()));
        self
    }

    /// Addressing used for every chunk.
    #[must_use]
    pub fn target(&self) -> PldmTarget {
        self.target
    }

    fn send(&self, data: &[u8], offset: u32, last: bool) -> Result<(), UpdateError> {
        let chunk = FirmwareChunk {
            bus: self.target.bus,
            endpoint: self.target.endpoint,
            component_id: self.target.component_id,
            offset,
            data,
            last,
            standard_descriptor: self.target.standard_descriptor,
        };
        self.retry
            .retry(|| self.transport.send_firmware_chunk(&chunk))
            .map_err(|source| UpdateError::Transport {
                state: UpdateState::Writing,
                source,
            })
    }

    fn refresh_version_cache(&self) {
        let Some((cache, key)) = &self.version_cache else {
            return;
        };
        let params = match self
            .transport
            .get_firmware_parameters(self.target.bus, self.target.endpoint)
        {
            Ok(params) => params,
            Err(e) => {
                warn!(key = %key, error = %e, "could not read back firmware version");
                return;
            }
        };
        let version = params.pending_version.unwrap_or(params.active_version);
        if let Err(e) = cache.set(key, &version) {
            warn!(key = %key, error = %e, "failed to cache firmware version");
        }
    }
}

impl FirmwareWriter for PldmWriter {
    fn write(&self, image: &Path) -> Result<(), UpdateError> {
        let image = FirmwareImage::load(image).map_err(UpdateError::io(UpdateState::Writing, image))?;
        let total = image.size();
        info!(
            bus = self.target.bus,
            endpoint = self.target.endpoint,
            component = self.target.component_id,
            bytes = total,
            "sending image to bridge controller"
        );

        let invalid = |message: String| UpdateError::Io {
            state: UpdateState::Writing,
            path: image.path().to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, message),
        };
        if total == 0 {
            return Err(invalid("image is empty".to_owned()));
        }

        for span in chunk_plan(total) {
            let offset = u32::try_from(span.offset).map_err(|e| invalid(e.to_string()))?;
            let data = span
                .offset
                .checked_add(span.len)
                .and_then(|end| image.bytes().get(span.offset..end))
                .ok_or_else(|| {
                    invalid(format!("chunk at {} runs past the {total}-byte image", span.offset))
                })?;
            self.send(data, offset, span.last)?;
            if span.offset % BIC_BLOCK_SIZE == 0 {
                debug!(offset, total, "transfer progress");
            }
        }

        self.refresh_version_cache();
        Ok(())
    }
}
