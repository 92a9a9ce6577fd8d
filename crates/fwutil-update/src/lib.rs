//! Component registry and update orchestration for BMC firmware
//!
//! This crate drives a firmware image into a hardware component:
//! - A [`ComponentRegistry`] of [`Component`]s keyed by FRU, board and name
//! - An [`UpdateOrchestrator`] sequencing validation, power-down, recovery
//!   mode, writing, verification and power restore
//! - Per-family policies deciding which of those steps run and how their
//!   bounded waits end
//! - Writers for MTD flash (optionally behind a GPIO mux and SPI driver
//!   bind) and for bridge controllers reached over a chunked transport
//!
//! # Architecture
//!
//! - [`state`]: update states, failure reasons, status codes, run report
//! - [`orchestrator`]: the state machine and image validation
//! - [`family`]: per-family sequencing policies
//! - [`writer`]: MTD and bridge-controller write strategies
//! - [`component`], [`components`]: the component trait and its variants
//! - [`registry`]: registration, alias resolution, selection
//! - [`platform`]: traits for the platform, transport and cache the engine
//!   drives
//! - [`cache`], [`mtd`]: file-backed cache and `/proc/mtd` parsing
//! - [`retry`]: retry budgets and the stop flag
//!
//! # Example
//!
//! ```no_run
//! use fwutil_update::prelude::*;
//!
//! fn update_bios(registry: &ComponentRegistry) -> Result<(), UpdateError> {
//!     let id = ComponentId::new("slot1", "bios");
//!     let Some(bios) = registry.get(&id) else {
//!         return Ok(());
//!     };
//!     let report = bios.update(std::path::Path::new("/tmp/bios.bin"));
//!     for transition in report.transitions() {
//!         println!("{} at {}", transition.state, transition.at);
//!     }
//!     report.into_result()
//! }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod cache;
pub mod component;
pub mod components;
pub mod error;
pub mod family;
pub mod image;
pub mod mtd;
pub mod orchestrator;
pub mod platform;
pub mod prelude;
pub mod registry;
pub mod retry;
pub mod state;
pub mod writer;

pub use cache::FileCache;
pub use component::{Component, ComponentId, ComponentKind};
pub use components::{BridgeComponent, FlashComponent, TpmComponent, VersionSource};
pub use error::{PlatformError, TransportError, UpdateError};
pub use family::{Family, FamilyPolicy};
pub use orchestrator::{UpdateOrchestrator, Validation};
pub use platform::{PersistedCache, PlatformControl, PowerState, Transport};
pub use registry::{ALL, ComponentEntry, ComponentRegistry, LOCK_DIR, lock_path, lock_path_in};
pub use retry::{RetryPolicy, StopFlag};
pub use state::{FailureReason, FwStatus, UpdateReport, UpdateState};
pub use writer::{FirmwareWriter, GpioSwitchedSpiWriter, MtdWriter, PldmTarget, PldmWriter};
