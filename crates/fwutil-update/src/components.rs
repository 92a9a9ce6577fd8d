//! Concrete component variants.
//!
//! * [`FlashComponent`]: MTD-backed parts (`mtd`, `spi_mtd`,
//!   `gpio_switched_spi_mtd`, `bios`, `bmc`), written by an [`MtdWriter`]
//!   under the family's power sequence.
//! * [`BridgeComponent`]: parts behind a bridge controller (`pldm`, `vr`,
//!   `cpld`, `nic`), written by a [`PldmWriter`] with a cached version.
//! * [`TpmComponent`]: version reporting only.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::component::{Component, ComponentId, ComponentKind};
use crate::error::UpdateError;
use crate::family::FamilyPolicy;
use crate::orchestrator::{UpdateOrchestrator, Validation};
use crate::platform::{PersistedCache, PlatformControl, Transport};
use crate::retry::{RetryPolicy, StopFlag};
use crate::state::{UpdateReport, UpdateState};
use crate::writer::{MtdWriter, PldmTarget, PldmWriter};

/// Where a component's installed version is read from.
#[derive(Clone)]
pub enum VersionSource {
    /// A key in the persisted cache
    Cache {
        /// Cache holding the value
        cache: Arc<dyn PersistedCache>,
        /// Key of the value
        key: String,
    },
    /// First non-empty line of a file, e.g. a sysfs attribute
    File(PathBuf),
}

impl fmt::Debug for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache { key, .. } => f.debug_struct("Cache").field("key", key).finish_non_exhaustive(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl VersionSource {
    /// Read the version.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the key is absent or the file is unreadable
    /// or empty.
    pub fn read(&self) -> Result<String, UpdateError> {
        match self {
            Self::Cache { cache, key } => cache.get(key).ok_or_else(|| UpdateError::Io {
                state: UpdateState::Idle,
                path: PathBuf::from(key),
                source: io::Error::new(io::ErrorKind::NotFound, "no cached version"),
            }),
            Self::File(path) => {
                let text = fs::read_to_string(path).map_err(UpdateError::io(UpdateState::Idle, path))?;
                text.lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_owned)
                    .ok_or_else(|| UpdateError::Io {
                        state: UpdateState::Idle,
                        path: path.clone(),
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "empty version file"),
                    })
            }
        }
    }
}

/// Cache key for the version of `id`, e.g. `slot1_1ou_vr_ver`.
#[must_use]
pub fn version_key(id: &ComponentId) -> String {
    match &id.board {
        Some(board) => format!("{}_{}_{}_ver", id.fru, board, id.name),
        None => format!("{}_{}_ver", id.fru, id.name),
    }
}

/// A component stored in an MTD partition.
pub struct FlashComponent {
    id: ComponentId,
    kind: ComponentKind,
    family: FamilyPolicy,
    validation: Validation,
    writer: MtdWriter,
    platform: Arc<dyn PlatformControl>,
    version: Option<VersionSource>,
    stop: StopFlag,
}

impl fmt::Debug for FlashComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashComponent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("family", &self.family)
            .field("writer", &self.writer)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl FlashComponent {
    /// Component sequenced by `family` and written through `writer`.
    #[must_use]
    pub fn new(
        id: ComponentId,
        kind: ComponentKind,
        family: FamilyPolicy,
        writer: MtdWriter,
        platform: Arc<dyn PlatformControl>,
    ) -> Self {
        Self {
            id,
            kind,
            family,
            validation: Validation::None,
            writer,
            platform,
            version: None,
            stop: StopFlag::new(),
        }
    }

    /// Image checks run by non-forced updates.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Source of the installed version.
    #[must_use]
    pub fn with_version(mut self, source: VersionSource) -> Self {
        self.version = Some(source);
        self
    }

    /// Flag checked between update steps.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Sequencing policy.
    #[must_use]
    pub fn family(&self) -> &FamilyPolicy {
        &self.family
    }

    fn run(&self, image: &Path, force: bool) -> UpdateReport {
        info!(component = %self.id, kind = %self.kind, mtd = self.writer.mtd(), "component upgrade initiated");
        let report = UpdateOrchestrator::new(self.id.clone(), self.family, &self.writer, &*self.platform)
            .with_validation(self.validation.clone())
            .with_stop_flag(self.stop.clone())
            .run(image, force);
        if report.is_success() {
            info!(component = %self.id, "component upgrade completed");
        }
        report
    }
}

impl Component for FlashComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn update(&self, image: &Path) -> UpdateReport {
        self.run(image, false)
    }

    fn force_update(&self, image: &Path) -> UpdateReport {
        self.run(image, true)
    }

    fn dump(&self, out: &Path) -> Result<(), UpdateError> {
        self.writer.dump(out)
    }

    fn get_version(&self) -> Result<String, UpdateError> {
        match &self.version {
            Some(source) => source.read(),
            None => Err(self.not_supported("version")),
        }
    }
}

/// A component updated through a bridge controller.
pub struct BridgeComponent {
    id: ComponentId,
    kind: ComponentKind,
    family: FamilyPolicy,
    validation: Validation,
    writer: PldmWriter,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn PersistedCache>,
    platform: Arc<dyn PlatformControl>,
    stop: StopFlag,
}

impl fmt::Debug for BridgeComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeComponent")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl BridgeComponent {
    /// Component at `target`, caching its version under [`version_key`].
    #[must_use]
    pub fn new(
        id: ComponentId,
        kind: ComponentKind,
        target: PldmTarget,
        transport: Arc<dyn Transport>,
        cache: Arc<dyn PersistedCache>,
        platform: Arc<dyn PlatformControl>,
    ) -> Self {
        let writer = PldmWriter::new(Arc::clone(&transport), target)
            .with_version_cache(Arc::clone(&cache), version_key(&id));
        Self {
            id,
            kind,
            family: FamilyPolicy::default(),
            validation: Validation::None,
            writer,
            transport,
            cache,
            platform,
            stop: StopFlag::new(),
        }
    }

    /// Sequencing policy, [`Family::Pldm`](crate::family::Family::Pldm) by
    /// default.
    #[must_use]
    pub fn with_family(mut self, family: FamilyPolicy) -> Self {
        self.family = family;
        self
    }

    /// Image checks run by non-forced updates.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Per-chunk retry budget.
    #[must_use]
    pub fn with_chunk_retry(mut self, retry: RetryPolicy) -> Self {
        self.writer = self.writer.with_retry(retry);
        self
    }

    /// Flag checked between update steps.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    fn run(&self, image: &Path, force: bool) -> UpdateReport {
        let target = self.writer.target();
        info!(
            component = %self.id,
            kind = %self.kind,
            bus = target.bus,
            endpoint = target.endpoint,
            "component upgrade initiated"
        );
        let report = UpdateOrchestrator::new(self.id.clone(), self.family, &self.writer, &*self.platform)
            .with_validation(self.validation.clone())
            .with_stop_flag(self.stop.clone())
            .run(image, force);
        if report.is_success() {
            info!(component = %self.id, "component upgrade completed");
        }
        report
    }
}

impl Component for BridgeComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn update(&self, image: &Path) -> UpdateReport {
        self.run(image, false)
    }

    fn force_update(&self, image: &Path) -> UpdateReport {
        self.run(image, true)
    }

    fn get_version(&self) -> Result<String, UpdateError> {
        let key = version_key(&self.id);
        if let Some(version) = self.cache.get(&key) {
            debug!(key, "version from cache");
            return Ok(version);
        }

        let target = self.writer.target();
        let params = self
            .transport
            .get_firmware_parameters(target.bus, target.endpoint)
            .map_err(|source| UpdateError::Transport {
                state: UpdateState::Idle,
                source,
            })?;
        if let Err(e) = self.cache.set(&key, &params.active_version) {
            warn!(key, error = %e, "failed to cache firmware version");
        }
        Ok(params.active_version)
    }
}

/// A TPM: reports its version, cannot be updated.
#[derive(Debug)]
pub struct TpmComponent {
    id: ComponentId,
    version: VersionSource,
}

impl TpmComponent {
    /// TPM whose version is read from `version`.
    #[must_use]
    pub fn new(id: ComponentId, version: VersionSource) -> Self {
        Self { id, version }
    }
}

impl Component for TpmComponent {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Tpm
    }

    fn get_version(&self) -> Result<String, UpdateError> {
        self.version.read()
    }
}
