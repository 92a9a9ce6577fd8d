//! Board support backed by the BMC's userspace tools and sysfs.
//!
//! Power and management-engine requests go through `power-util` and
//! `me-util`, GPIOs through `/sys/class/gpio`, flash writes through `flashcp`
//! and bridge-controller transfers through a PLDM helper that takes the chunk
//! on stdin.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use fwutil_update::mtd::PROC_MTD;
use fwutil_update::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Raw IPMI request asking the management engine to restart into recovery
/// firmware.
const ME_FORCE_RECOVERY: [&str; 6] = ["0xB8", "0xDF", "0x57", "0x01", "0x00", "0x01"];
/// Raw IPMI Get Self-Test Results request.
const ME_SELF_TEST: [&str; 2] = ["0x18", "0x04"];
/// Self-test result reported once recovery firmware is running.
const ME_IN_RECOVERY: [u8; 2] = [0x81, 0x02];

/// Locations of the platform tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tools {
    /// Host power control (`power-util`)
    pub power_util: PathBuf,
    /// Raw management engine requests (`me-util`)
    pub me_util: PathBuf,
    /// MTD flash writer
    pub flashcp: PathBuf,
    /// Chunk sender for bridge controllers
    pub pldm_tool: PathBuf,
    /// sysfs GPIO class directory
    pub gpio_root: PathBuf,
    /// MTD partition table
    pub proc_mtd: PathBuf,
    /// Seconds to let the management engine restart before checking it
    pub recovery_settle_secs: u64,
    /// Per-FRU GPIO that reads `active` once the host has booted
    pub boot_complete: BTreeMap<String, GpioLine>,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            power_util: PathBuf::from("/usr/local/bin/power-util"),
            me_util: PathBuf::from("/usr/local/bin/me-util"),
            flashcp: PathBuf::from("/usr/sbin/flashcp"),
            pldm_tool: PathBuf::from("/usr/local/bin/pldm-fw-chunk"),
            gpio_root: PathBuf::from("/sys/class/gpio"),
            proc_mtd: PathBuf::from(PROC_MTD),
            recovery_settle_secs: 10,
            boot_complete: BTreeMap::new(),
        }
    }
}

fn command_line(program: &Path, args: &[&str]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    match stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => format!("{}: {line}", output.status),
        None => output.status.to_string(),
    }
}

/// Run `program` to completion, feeding it `stdin`, and return its stdout.
fn run(program: &Path, args: &[&str], stdin: Option<&[u8]>) -> Result<String, PlatformError> {
    let command = command_line(program, args);
    debug!(command, "running platform tool");
    let io_err = |source| PlatformError::Io {
        path: program.to_path_buf(),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(io_err)?;
    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        if let Err(source) = pipe.write_all(data) {
            drop(pipe);
            reap(&mut child, &command);
            return Err(io_err(source));
        }
    }
    let output = child.wait_with_output().map_err(io_err)?;

    if !output.status.success() {
        return Err(PlatformError::Command {
            command,
            detail: failure_detail(&output),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Kill and wait for a child that will not be read to completion.
fn reap(child: &mut Child, command: &str) {
    if let Err(e) = child.kill() {
        debug!(command, error = %e, "kill after failed stdin write");
    }
    if let Err(e) = child.wait() {
        warn!(command, error = %e, "failed to reap platform tool");
    }
}

/// Parse `Power status for fru 1 : ON`.
fn parse_power_status(text: &str) -> Option<PowerState> {
    let (_, state) = text.trim().rsplit_once(':')?;
    match state.trim() {
        "ON" => Some(PowerState::On),
        "OFF" => Some(PowerState::Off),
        _ => None,
    }
}

/// Hex bytes of a raw `me-util` response: completion code first.
fn parse_hex_bytes(text: &str) -> Vec<u8> {
    text.split_whitespace()
        .filter_map(|b| u8::from_str_radix(b.trim_start_matches("0x"), 16).ok())
        .collect()
}

/// Whether a Get Self-Test Results response reports recovery firmware.
fn reports_recovery(response: &[u8]) -> bool {
    matches!(response, [0x00, rest @ ..] if rest.starts_with(&ME_IN_RECOVERY))
}

fn write_sysfs(path: &Path, value: &str) -> Result<(), PlatformError> {
    debug!(path = %path.display(), value, "sysfs write");
    fs::write(path, value).map_err(|source| PlatformError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// [`PlatformControl`] for a Linux BMC.
#[derive(Debug, Clone, Default)]
pub struct LinuxPlatform {
    tools: Tools,
}

impl LinuxPlatform {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    fn power_util(&self, fru: &str, action: &str) -> Result<String, PlatformError> {
        run(&self.tools.power_util, &[fru, action], None)
    }

    fn me_util(&self, fru: &str, request: &[&str]) -> Result<Vec<u8>, PlatformError> {
        let mut args = vec![fru];
        args.extend_from_slice(request);
        run(&self.tools.me_util, &args, None).map(|out| parse_hex_bytes(&out))
    }

    fn gpio_dir(&self, line: u32) -> Result<PathBuf, PlatformError> {
        let dir = self.tools.gpio_root.join(format!("gpio{line}"));
        if !dir.exists() {
            write_sysfs(&self.tools.gpio_root.join("export"), &line.to_string())?;
        }
        Ok(dir)
    }
}

impl PlatformControl for LinuxPlatform {
    fn graceful_shutdown(&self, fru: &str) -> Result<(), PlatformError> {
        self.power_util(fru, "graceful-shutdown").map(drop)
    }

    fn power_off(&self, fru: &str) -> Result<(), PlatformError> {
        self.power_util(fru, "off").map(drop)
    }

    fn power_on(&self, fru: &str) -> Result<(), PlatformError> {
        self.power_util(fru, "on").map(drop)
    }

    fn power_cycle(&self, fru: &str) -> Result<(), PlatformError> {
        self.power_util(fru, "cycle").map(drop)
    }

    fn get_power_status(&self, fru: &str) -> Result<PowerState, PlatformError> {
        let out = self.power_util(fru, "status")?;
        parse_power_status(&out).ok_or_else(|| PlatformError::Command {
            command: command_line(&self.tools.power_util, &[fru, "status"]),
            detail: format!("unexpected output '{}'", out.trim()),
        })
    }

    fn enter_recovery_mode(&self, fru: &str) -> Result<(), PlatformError> {
        let reply = self.me_util(fru, &ME_FORCE_RECOVERY)?;
        if let Some(cc) = reply.first().copied().filter(|&cc| cc != 0) {
            return Err(PlatformError::Command {
                command: command_line(&self.tools.me_util, &ME_FORCE_RECOVERY),
                detail: format!("completion code 0x{cc:02x}"),
            });
        }

        info!(fru, settle_secs = self.tools.recovery_settle_secs, "waiting for ME restart");
        thread::sleep(Duration::from_secs(self.tools.recovery_settle_secs));

        let self_test = self.me_util(fru, &ME_SELF_TEST)?;
        if !reports_recovery(&self_test) {
            return Err(PlatformError::Command {
                command: command_line(&self.tools.me_util, &ME_SELF_TEST),
                detail: format!("self-test reports {self_test:02x?}, ME not in recovery"),
            });
        }
        Ok(())
    }

    fn reset(&self, fru: &str) -> Result<(), PlatformError> {
        self.power_util(fru, "reset").map(drop)
    }

    fn gpio_set(&self, line: u32, value: u8) -> Result<(), PlatformError> {
        let dir = self.gpio_dir(line)?;
        write_sysfs(&dir.join("direction"), "out")?;
        write_sysfs(&dir.join("value"), &value.to_string())
    }

    fn bind_driver(&self, driver: &Path, device: &str) -> Result<(), PlatformError> {
        write_sysfs(&driver.join("bind"), device)
    }

    fn unbind_driver(&self, driver: &Path, device: &str) -> Result<(), PlatformError> {
        write_sysfs(&driver.join("unbind"), device)
    }

    fn resolve_mtd_device(&self, name: &str) -> Result<PathBuf, PlatformError> {
        let table = MtdTable::read(&self.tools.proc_mtd).map_err(|source| PlatformError::Io {
            path: self.tools.proc_mtd.clone(),
            source,
        })?;
        table
            .find(name)
            .map(MtdPartition::device_path)
            .ok_or_else(|| PlatformError::MtdNotFound(name.to_owned()))
    }

    fn flash_device(&self, device: &Path, image: &Path) -> Result<(), PlatformError> {
        let image = image.to_string_lossy();
        let device = device.to_string_lossy();
        run(&self.tools.flashcp, &["-v", &image, &device], None).map(drop)
    }

    fn dump_device(&self, device: &Path, out: &Path) -> Result<(), PlatformError> {
        fs::copy(device, out)
            .map(drop)
            .map_err(|source| PlatformError::Io {
                path: device.to_path_buf(),
                source,
            })
    }

    fn is_boot_complete(&self, fru: &str) -> Result<bool, PlatformError> {
        let Some(gpio) = self.tools.boot_complete.get(fru) else {
            return Err(PlatformError::Unsupported {
                fru: fru.to_owned(),
                operation: "boot-complete detection",
            });
        };
        let path = self.gpio_dir(gpio.line)?.join("value");
        let level = fs::read_to_string(&path).map_err(|source| PlatformError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(level.trim() == gpio.active.to_string())
    }
}

/// [`Transport`] that shells out to the PLDM helper once per request.
///
/// `send` takes `bus endpoint component offset last standard` with the chunk
/// on stdin; `params` prints `{"active_version": .., "pending_version": ..}`.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    tool: PathBuf,
}

impl CommandTransport {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    fn transport_error(bus: u8, endpoint: u8, error: &PlatformError) -> TransportError {
        match error {
            PlatformError::Io { .. } => TransportError::NoResponse { bus, endpoint },
            other => TransportError::Malformed(other.to_string()),
        }
    }
}

impl Transport for CommandTransport {
    fn send_firmware_chunk(&self, chunk: &FirmwareChunk<'_>) -> Result<(), TransportError> {
        let (bus, endpoint) = (chunk.bus.to_string(), chunk.endpoint.to_string());
        let component = chunk.component_id.to_string();
        let offset = chunk.offset.to_string();
        let last = u8::from(chunk.last).to_string();
        let standard = u8::from(chunk.standard_descriptor).to_string();
        let args = ["send", &bus, &endpoint, &component, &offset, &last, &standard];

        run(&self.tool, &args, Some(chunk.data))
            .map(drop)
            .map_err(|e| {
                warn!(error = %e, offset = chunk.offset, "chunk transfer failed");
                Self::transport_error(chunk.bus, chunk.endpoint, &e)
            })
    }

    fn get_firmware_parameters(
        &self,
        bus: u8,
        endpoint: u8,
    ) -> Result<FirmwareParameters, TransportError> {
        let (bus_arg, endpoint_arg) = (bus.to_string(), endpoint.to_string());
        let out = run(&self.tool, &["params", &bus_arg, &endpoint_arg], None)
            .map_err(|e| Self::transport_error(bus, endpoint, &e))?;
        serde_json::from_str(&out).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_status_parsing() {
        assert_eq!(
            parse_power_status("Power status for fru 1 : ON\n"),
            Some(PowerState::On)
        );
        assert_eq!(
            parse_power_status("Power status for fru 2 : OFF"),
            Some(PowerState::Off)
        );
        assert_eq!(parse_power_status("usage: power-util"), None);
    }

    #[test]
    fn test_self_test_response() {
        assert!(reports_recovery(&parse_hex_bytes("00 81 02 \n")));
        assert!(!reports_recovery(&parse_hex_bytes("00 55 00")));
        assert!(!reports_recovery(&parse_hex_bytes("c1")));
        assert!(!reports_recovery(&[]));
    }

    #[test]
    fn test_sysfs_gpio_is_exported_then_driven() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempfile::tempdir()?;
        fs::write(root.path().join("export"), "")?;
        fs::create_dir(root.path().join("gpio54"))?;
        let platform = LinuxPlatform::new(Tools {
            gpio_root: root.path().to_path_buf(),
            ..Tools::default()
        });

        platform.gpio_set(54, 1)?;
        assert_eq!(fs::read_to_string(root.path().join("gpio54/direction"))?, "out");
        assert_eq!(fs::read_to_string(root.path().join("gpio54/value"))?, "1");
        Ok(())
    }

    #[test]
    fn test_mtd_lookup_uses_configured_table() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let proc_mtd = dir.path().join("mtd");
        fs::write(&proc_mtd, "dev:    size   erasesize  name\nmtd5: 02000000 00010000 \"flash1\"\n")?;
        let platform = LinuxPlatform::new(Tools {
            proc_mtd,
            ..Tools::default()
        });

        assert_eq!(platform.resolve_mtd_device("flash1")?, PathBuf::from("/dev/mtd5"));
        assert!(matches!(
            platform.resolve_mtd_device("pnor"),
            Err(PlatformError::MtdNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_boot_complete_without_gpio_is_unsupported() {
        let platform = LinuxPlatform::default();
        assert!(matches!(
            platform.is_boot_complete("slot1"),
            Err(PlatformError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_missing_tool_is_an_io_error() {
        let platform = LinuxPlatform::new(Tools {
            power_util: PathBuf::from("/nonexistent/power-util"),
            ..Tools::default()
        });
        assert!(matches!(
            platform.power_on("slot1"),
            Err(PlatformError::Io { .. })
        ));
    }

    #[test]
    fn test_tool_that_ignores_stdin_is_reaped_with_an_io_error() {
        let data = vec![0u8; 1 << 20];
        let result = run(Path::new("/bin/sh"), &["-c", "exit 0"], Some(&data));
        assert!(matches!(
            result,
            Err(PlatformError::Io { source, .. }) if source.kind() == std::io::ErrorKind::BrokenPipe
        ));
    }
}
