//! Command implementations for the fw-util CLI

pub mod dump;
pub mod list;
pub mod update;
pub mod validate;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use fwutil_update::prelude::*;

use crate::error::CliError;
use crate::platform::{CommandTransport, LinuxPlatform};
use crate::table::{Collaborators, ComponentTable};

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub json: bool,
    pub table: PathBuf,
    pub lock_dir: PathBuf,
}

impl Context {
    /// Load the component table and build the registry against the real
    /// platform.
    pub fn registry(&self, stop: &StopFlag) -> Result<ComponentRegistry, CliError> {
        let table = ComponentTable::load(&self.table)?;
        let collaborators = Collaborators {
            platform: Arc::new(LinuxPlatform::new(table.tools.clone())),
            transport: Arc::new(CommandTransport::new(&table.tools.pldm_tool)),
            cache: Arc::new(FileCache::new(&table.cache_dir)),
            stop: stop.clone(),
        };
        table.build_registry(&collaborators)
    }
}

/// Exactly one component named on the command line.
pub fn single<'r>(
    registry: &'r ComponentRegistry,
    fru: &str,
    component: &str,
) -> Result<&'r dyn Component, CliError> {
    let not_found = || CliError::ComponentNotFound {
        fru: fru.to_owned(),
        component: component.to_owned(),
    };
    if fru == ALL || component == ALL {
        return Err(not_found());
    }
    registry.select(fru, component).into_iter().next().ok_or_else(not_found)
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// FRU name, e.g. slot1 or bmc
    pub fru: String,
    /// Component name, `board/name` on multi-board FRUs
    pub component: String,
    /// Firmware image
    pub image: PathBuf,
    /// Skip image validation and tolerate recovery-mode failures
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// FRU name or `all`
    #[arg(default_value = ALL)]
    pub fru: String,
    /// Component name or `all`
    #[arg(default_value = ALL)]
    pub component: String,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// FRU name
    pub fru: String,
    /// Component name
    pub component: String,
    /// Where to write the flash contents
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Firmware image
    pub image: PathBuf,
    /// Partition map to check against
    #[arg(long)]
    pub config: PathBuf,
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
