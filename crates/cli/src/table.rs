//! The component table: which components this BMC has and how to reach them.
//!
//! ```json
//! {
//!   "partition_config": "/etc/image_parts.json",
//!   "components": [
//!     {"fru": "bmc", "name": "bmc", "kind": "bmc", "mtd": "flash0",
//!      "validate_layout": true, "version_file": "/etc/issue"},
//!     {"fru": "slot1", "name": "bios", "kind": "bios", "mtd": "pnor",
//!      "gpio": {"line": 54, "active": 1},
//!      "spi_driver": "/sys/bus/platform/drivers/aspeed-smc",
//!      "spi_device": "1e630000.spi"},
//!     {"fru": "slot1", "board": "1ou", "name": "vr", "kind": "vr",
//!      "bus": 0, "endpoint": 10, "component_id": 5,
//!      "signed": {"project_name": "Yosemite V3.5", "board_id": 3,
//!                 "stage_id": 2, "component_id": 5, "vendor_id": 1}},
//!     {"fru": "bmc", "name": "rom", "kind": "alias",
//!      "target_fru": "bmc", "target_name": "bmc"}
//!   ]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fwutil_image::{ImageDescriptorList, SignedHeader, SignedImageVerifier, StagePolicy};
use fwutil_update::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CliError;
use crate::platform::Tools;

/// Default location of the component table.
pub const DEFAULT_TABLE: &str = "/etc/fw-util/components.json";

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/tmp/cache_store")
}

/// Everything `fw-util` knows about the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentTable {
    /// Partition map for layout validation
    #[serde(default)]
    pub partition_config: Option<PathBuf>,
    /// Directory of the version cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub tools: Tools,
    /// Registration order is the order `version all` prints in
    pub components: Vec<ComponentSpec>,
}

/// One row of the component table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    pub fru: String,
    #[serde(default)]
    pub board: Option<String>,
    pub name: String,
    pub kind: ComponentKind,
    /// Sequencing policy; derived from `kind` when absent
    #[serde(default)]
    pub family: Option<Family>,

    #[serde(default)]
    pub mtd: Option<String>,
    #[serde(default)]
    pub gpio: Option<GpioLine>,
    #[serde(default)]
    pub spi_driver: Option<PathBuf>,
    #[serde(default)]
    pub spi_device: Option<String>,

    /// Check images against `partition_config` before writing
    #[serde(default)]
    pub validate_layout: bool,
    /// Identity signed images must carry
    #[serde(default)]
    pub signed: Option<SignedHeader>,
    #[serde(default)]
    pub stage_policy: StagePolicy,

    #[serde(default)]
    pub bus: Option<u8>,
    #[serde(default)]
    pub endpoint: Option<u8>,
    #[serde(default)]
    pub component_id: Option<u8>,
    #[serde(default)]
    pub standard_descriptor: bool,
    /// Attempts per chunk, one second apart
    #[serde(default)]
    pub chunk_retries: Option<u32>,

    #[serde(default)]
    pub version_file: Option<PathBuf>,

    #[serde(default)]
    pub target_fru: Option<String>,
    #[serde(default)]
    pub target_board: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
}

/// Sequencing family used when a row does not name one.
pub fn default_family(kind: ComponentKind) -> Family {
    match kind {
        ComponentKind::Bios => Family::Bios,
        ComponentKind::GpioSwitchedSpiMtd => Family::GpioSwitchedFlash,
        ComponentKind::Pldm | ComponentKind::Vr | ComponentKind::Cpld | ComponentKind::Nic => {
            Family::Pldm
        }
        ComponentKind::Mtd
        | ComponentKind::SpiMtd
        | ComponentKind::Bmc
        | ComponentKind::Tpm
        | ComponentKind::Alias => Family::Bmc,
    }
}

/// Shared collaborators every component is built with.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn PlatformControl>,
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<dyn PersistedCache>,
    pub stop: StopFlag,
}

impl ComponentSpec {
    pub fn id(&self) -> ComponentId {
        let id = ComponentId::new(&self.fru, &self.name);
        match &self.board {
            Some(board) => id.on_board(board),
            None => id,
        }
    }

    fn family(&self) -> FamilyPolicy {
        self.family.unwrap_or_else(|| default_family(self.kind)).policy()
    }

    fn missing(&self, field: &str) -> CliError {
        CliError::InvalidTable(format!(
            "{}: kind '{}' requires '{field}'",
            self.id(),
            self.kind
        ))
    }

    fn require<'a, T>(&self, value: &'a Option<T>, field: &str) -> Result<&'a T, CliError> {
        value.as_ref().ok_or_else(|| self.missing(field))
    }

    fn spi_binding(&self) -> Result<Option<SpiBinding>, CliError> {
        match (&self.spi_driver, &self.spi_device) {
            (Some(driver), Some(device)) => Ok(Some(SpiBinding {
                driver: driver.clone(),
                device: device.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(self.missing("spi_device")),
            (None, Some(_)) => Err(self.missing("spi_driver")),
        }
    }

    fn validation(&self, layouts: Option<&Arc<ImageDescriptorList>>) -> Result<Validation, CliError> {
        if self.validate_layout {
            let layouts = layouts.ok_or_else(|| self.missing("partition_config"))?;
            return Ok(Validation::Layout(Arc::clone(layouts)));
        }
        Ok(match &self.signed {
            Some(header) => Validation::Signed(
                SignedImageVerifier::new(header.clone()).with_stage_policy(self.stage_policy),
            ),
            None => Validation::None,
        })
    }

    fn flash_component(
        &self,
        ctx: &Collaborators,
        layouts: Option<&Arc<ImageDescriptorList>>,
    ) -> Result<FlashComponent, CliError> {
        let mtd = self.require(&self.mtd, "mtd")?;
        let spi = self.spi_binding()?;
        match self.kind {
            ComponentKind::SpiMtd if spi.is_none() => return Err(self.missing("spi_driver")),
            ComponentKind::GpioSwitchedSpiMtd if self.gpio.is_none() => {
                return Err(self.missing("gpio"));
            }
            _ => {}
        }

        let mut writer = MtdWriter::new(Arc::clone(&ctx.platform), mtd.as_str());
        if self.gpio.is_some() || spi.is_some() {
            writer = writer.with_switch(GpioSwitchedSpiWriter::new(self.gpio, spi));
        }
        let mut component = FlashComponent::new(
            self.id(),
            self.kind,
            self.family(),
            writer,
            Arc::clone(&ctx.platform),
        )
        .with_validation(self.validation(layouts)?)
        .with_stop_flag(ctx.stop.clone());
        if let Some(path) = &self.version_file {
            component = component.with_version(VersionSource::File(path.clone()));
        }
        Ok(component)
    }

    fn bridge_component(
        &self,
        ctx: &Collaborators,
        layouts: Option<&Arc<ImageDescriptorList>>,
    ) -> Result<BridgeComponent, CliError> {
        let target = PldmTarget {
            bus: *self.require(&self.bus, "bus")?,
            endpoint: *self.require(&self.endpoint, "endpoint")?,
            component_id: *self.require(&self.component_id, "component_id")?,
            standard_descriptor: self.standard_descriptor,
        };
        let mut component = BridgeComponent::new(
            self.id(),
            self.kind,
            target,
            Arc::clone(&ctx.transport),
            Arc::clone(&ctx.cache),
            Arc::clone(&ctx.platform),
        )
        .with_family(self.family())
        .with_validation(self.validation(layouts)?)
        .with_stop_flag(ctx.stop.clone());
        if let Some(attempts) = self.chunk_retries {
            component = component.with_chunk_retry(RetryPolicy::new(attempts, Duration::from_secs(1)));
        }
        Ok(component)
    }

    fn alias_target(&self) -> Result<ComponentId, CliError> {
        let fru = self.require(&self.target_fru, "target_fru")?;
        let name = self.require(&self.target_name, "target_name")?;
        let target = ComponentId::new(fru, name);
        Ok(match &self.target_board {
            Some(board) => target.on_board(board),
            None => target,
        })
    }

    fn entry(
        &self,
        ctx: &Collaborators,
        layouts: Option<&Arc<ImageDescriptorList>>,
    ) -> Result<ComponentEntry, CliError> {
        Ok(match self.kind {
            ComponentKind::Mtd
            | ComponentKind::SpiMtd
            | ComponentKind::GpioSwitchedSpiMtd
            | ComponentKind::Bios
            | ComponentKind::Bmc => ComponentEntry::component(self.flash_component(ctx, layouts)?),
            ComponentKind::Pldm | ComponentKind::Vr | ComponentKind::Cpld | ComponentKind::Nic => {
                ComponentEntry::component(self.bridge_component(ctx, layouts)?)
            }
            ComponentKind::Tpm => {
                let path = self.require(&self.version_file, "version_file")?;
                ComponentEntry::component(TpmComponent::new(
                    self.id(),
                    VersionSource::File(path.clone()),
                ))
            }
            ComponentKind::Alias => ComponentEntry::Alias {
                id: self.id(),
                target: self.alias_target()?,
            },
        })
    }
}

impl ComponentTable {
    /// Read and parse the table at `path`.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CliError::InvalidTable(format!("cannot read {}: {e}", path.display()))
        })?;
        let table: Self = serde_json::from_str(&text)?;
        debug!(path = %path.display(), components = table.components.len(), "component table loaded");
        Ok(table)
    }

    fn layouts(&self) -> Result<Option<Arc<ImageDescriptorList>>, CliError> {
        if !self.components.iter().any(|c| c.validate_layout) {
            return Ok(None);
        }
        let Some(path) = &self.partition_config else {
            return Ok(None);
        };
        let layouts = ImageDescriptorList::from_path(path)?;
        info!(path = %path.display(), layouts = layouts.len(), "partition config loaded");
        Ok(Some(Arc::new(layouts)))
    }

    /// Build the registry. The partition config is parsed once and shared.
    pub fn build_registry(&self, ctx: &Collaborators) -> Result<ComponentRegistry, CliError> {
        let layouts = self.layouts()?;
        let entries = self
            .components
            .iter()
            .map(|spec| spec.entry(ctx, layouts.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ComponentRegistry::build(entries))
    }
}
