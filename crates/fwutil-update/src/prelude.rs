//! Convenience re-exports for common update types

pub use crate::cache::FileCache;
pub use crate::component::{Component, ComponentId, ComponentKind};
pub use crate::components::{
    BridgeComponent, FlashComponent, TpmComponent, VersionSource, version_key,
};
pub use crate::error::{PlatformError, TransportError, UpdateError};
pub use crate::family::{
    Family, FamilyPolicy, OnPowerOffTimeout, OnServiceModeFailure, PowerDownPolicy,
    RestorePolicy, ServiceModePolicy, VerifyPolicy,
};
pub use crate::mtd::{MtdPartition, MtdTable};
pub use crate::orchestrator::{UpdateOrchestrator, Validation};
pub use crate::platform::{
    FirmwareChunk, FirmwareParameters, GpioLine, PersistedCache, PlatformControl, PowerState,
    SpiBinding, Transport,
};
pub use crate::registry::{ALL, ComponentEntry, ComponentRegistry, LOCK_DIR, lock_path, lock_path_in};
pub use crate::retry::{RetryPolicy, StopFlag};
pub use crate::state::{FailureReason, FwStatus, Transition, UpdateReport, UpdateState};
pub use crate::writer::{
    BIC_BLOCK_SIZE, BIC_MAX_CHUNK, ChunkSpan, FirmwareWriter, GpioSwitchedSpiWriter, MtdWriter,
    PldmTarget, PldmWriter, chunk_plan,
};
