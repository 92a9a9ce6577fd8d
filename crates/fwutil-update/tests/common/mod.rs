//! Recording mocks of the platform collaborators.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fwutil_image::checksum::{crc32, md5};
use fwutil_image::{SignedHeader, SignedTrailer};
use fwutil_update::prelude::*;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Platform calls in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GracefulShutdown,
    PowerOff,
    PowerOn,
    PowerCycle,
    EnterRecoveryMode,
    Reset,
    GpioSet(u32, u8),
    Bind(String),
    Unbind(String),
    Flash(PathBuf),
    Dump(PathBuf),
}

/// How the mock platform misbehaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Host stays on after a graceful shutdown request
    pub ignores_shutdown: bool,
    /// Host stays on even after a forced power off
    pub ignores_power_off: bool,
    /// Every recovery-mode request fails
    pub recovery_fails: bool,
    /// The flash tool fails
    pub flash_fails: bool,
    /// Host never reports boot complete
    pub never_boots: bool,
}

/// A [`PlatformControl`] that records every mutating call.
#[derive(Debug)]
pub struct MockPlatform {
    faults: Faults,
    power: Mutex<PowerState>,
    calls: Mutex<Vec<Call>>,
    mtd: MtdTable,
    stop_on_shutdown: Option<StopFlag>,
}

impl MockPlatform {
    pub fn new(faults: Faults) -> Self {
        Self {
            faults,
            power: Mutex::new(PowerState::On),
            calls: Mutex::new(Vec::new()),
            mtd: MtdTable::parse(
                "dev:    size   erasesize  name\n\
                 mtd0: 02000000 00010000 \"flash0\"\n\
                 mtd1: 04000000 00010000 \"pnor\"\n",
            ),
            stop_on_shutdown: None,
        }
    }

    /// Raise `stop` when the host is asked to shut down, as Ctrl-C would.
    pub fn stopping(mut self, stop: StopFlag) -> Self {
        self.stop_on_shutdown = Some(stop);
        self
    }

    pub fn healthy() -> Self {
        Self::new(Faults::default())
    }

    pub fn powered_off(self) -> Self {
        *lock(&self.power) = PowerState::Off;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn power(&self) -> PowerState {
        *lock(&self.power)
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn fail(command: &str) -> PlatformError {
        PlatformError::Command {
            command: command.to_owned(),
            detail: "exit status 1".to_owned(),
        }
    }
}

impl PlatformControl for MockPlatform {
    fn graceful_shutdown(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::GracefulShutdown);
        if let Some(stop) = &self.stop_on_shutdown {
            stop.stop();
        }
        if !self.faults.ignores_shutdown {
            *lock(&self.power) = PowerState::Off;
        }
        Ok(())
    }

    fn power_off(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::PowerOff);
        if !self.faults.ignores_power_off {
            *lock(&self.power) = PowerState::Off;
        }
        Ok(())
    }

    fn power_on(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::PowerOn);
        *lock(&self.power) = PowerState::On;
        Ok(())
    }

    fn power_cycle(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::PowerCycle);
        *lock(&self.power) = PowerState::On;
        Ok(())
    }

    fn get_power_status(&self, _fru: &str) -> Result<PowerState, PlatformError> {
        Ok(self.power())
    }

    fn enter_recovery_mode(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::EnterRecoveryMode);
        if self.faults.recovery_fails {
            return Err(Self::fail("me-util recovery"));
        }
        Ok(())
    }

    fn reset(&self, _fru: &str) -> Result<(), PlatformError> {
        self.record(Call::Reset);
        Ok(())
    }

    fn gpio_set(&self, line: u32, value: u8) -> Result<(), PlatformError> {
        self.record(Call::GpioSet(line, value));
        Ok(())
    }

    fn bind_driver(&self, _driver: &Path, device: &str) -> Result<(), PlatformError> {
        self.record(Call::Bind(device.to_owned()));
        Ok(())
    }

    fn unbind_driver(&self, _driver: &Path, device: &str) -> Result<(), PlatformError> {
        self.record(Call::Unbind(device.to_owned()));
        Ok(())
    }

    fn resolve_mtd_device(&self, name: &str) -> Result<PathBuf, PlatformError> {
        self.mtd
            .find(name)
            .map(MtdPartition::device_path)
            .ok_or_else(|| PlatformError::MtdNotFound(name.to_owned()))
    }

    fn flash_device(&self, device: &Path, _image: &Path) -> Result<(), PlatformError> {
        self.record(Call::Flash(device.to_path_buf()));
        if self.faults.flash_fails {
            return Err(Self::fail("flashcp"));
        }
        Ok(())
    }

    fn dump_device(&self, _device: &Path, out: &Path) -> Result<(), PlatformError> {
        self.record(Call::Dump(out.to_path_buf()));
        std::fs::write(out, b"flash contents").map_err(|source| PlatformError::Io {
            path: out.to_path_buf(),
            source,
        })
    }

    fn is_boot_complete(&self, _fru: &str) -> Result<bool, PlatformError> {
        Ok(!self.faults.never_boots && self.power() == PowerState::On)
    }
}

/// Chunk metadata seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentChunk {
    pub component_id: u8,
    pub offset: u32,
    pub len: usize,
    pub last: bool,
    pub standard_descriptor: bool,
}

/// A [`Transport`] that acknowledges chunks and remembers the payload.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Chunk sends to fail before acknowledging
    failures: Mutex<u32>,
    chunks: Mutex<Vec<SentChunk>>,
    received: Mutex<Vec<u8>>,
    active_version: String,
    pending_version: Option<String>,
}

impl MockTransport {
    pub fn new(active_version: &str) -> Self {
        Self {
            active_version: active_version.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_pending(mut self, version: &str) -> Self {
        self.pending_version = Some(version.to_owned());
        self
    }

    pub fn failing(self, sends: u32) -> Self {
        *lock(&self.failures) = sends;
        self
    }

    pub fn chunks(&self) -> Vec<SentChunk> {
        lock(&self.chunks).clone()
    }

    pub fn received(&self) -> Vec<u8> {
        lock(&self.received).clone()
    }
}

impl Transport for MockTransport {
    fn send_firmware_chunk(&self, chunk: &FirmwareChunk<'_>) -> Result<(), TransportError> {
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::NoResponse {
                    bus: chunk.bus,
                    endpoint: chunk.endpoint,
                });
            }
        }
        lock(&self.chunks).push(SentChunk {
            component_id: chunk.component_id,
            offset: chunk.offset,
            len: chunk.data.len(),
            last: chunk.last,
            standard_descriptor: chunk.standard_descriptor,
        });
        lock(&self.received).extend_from_slice(chunk.data);
        Ok(())
    }

    fn get_firmware_parameters(
        &self,
        _bus: u8,
        _endpoint: u8,
    ) -> Result<FirmwareParameters, TransportError> {
        Ok(FirmwareParameters {
            active_version: self.active_version.clone(),
            pending_version: self.pending_version.clone(),
        })
    }
}

/// In-memory [`PersistedCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn with(key: &str, value: &str) -> Self {
        let cache = Self::default();
        lock(&cache.values).insert(key.to_owned(), value.to_owned());
        cache
    }
}

impl PersistedCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Every family budget with its count kept and no sleeping.
pub fn instant(family: Family) -> FamilyPolicy {
    family.policy().with_interval(Duration::ZERO)
}

pub fn bridge_header() -> SignedHeader {
    SignedHeader {
        project_name: "Yosemite V3.5".to_owned(),
        board_id: 0x03,
        stage_id: 2,
        component_id: 0x05,
        vendor_id: 0x01,
    }
}

/// `payload` followed by a correctly signed trailer for `header`.
pub fn signed_image(payload: &[u8], header: &SignedHeader) -> Vec<u8> {
    let trailer = SignedTrailer::new(header, md5(payload), b"oby35-cl-v1.2");
    let mut image = payload.to_vec();
    image.extend_from_slice(&trailer.encode());
    image
}

/// A U-Boot legacy image: 64-byte header followed by `payload`.
pub fn legacy_image(payload: &[u8]) -> Vec<u8> {
    let mut header = vec![0u8; 64];
    put_u32(&mut header, 0, 0x2705_1956);
    put_u32(&mut header, 12, payload.len() as u32);
    put_u32(&mut header, 24, crc32(payload));
    let hcrc = crc32(&header);
    put_u32(&mut header, 4, hcrc);
    header.extend_from_slice(payload);
    header
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    if let Some(field) = buf.get_mut(offset..offset + 4) {
        field.copy_from_slice(&value.to_be_bytes());
    }
}

/// Partition map with one layout: a legacy image in the first KiB.
pub const LEGACY_LAYOUT: &str = r#"{"bmc": {"u-boot": {"offset": 0, "size": 1, "type": "legacy"}}}"#;

/// Write `bytes` to a fresh temporary file.
pub fn write_temp(bytes: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
