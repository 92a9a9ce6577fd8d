//! Update state machine states, failure reasons and the per-run report.
//!
//! ```text
//! Idle ─► Validating ─► PoweringDown ─► EnteringServiceMode ─► Writing
//!   │         (skipped when forced)        (optional)             │
//!   │                                                             ▼
//!   │                         Done ◄─ RestoringPower ◄─────── Verifying
//!   │
//!   └──────────── any state ─► Failed(reason)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::component::ComponentId;
use crate::error::UpdateError;

/// Operator-visible status code of a finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum FwStatus {
    /// Operation completed
    Success = 0,
    /// Operation attempted and failed
    Failure = -1,
    /// Component does not support the operation
    NotSupported = -2,
}

impl FwStatus {
    /// Raw status code.
    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Machine-readable cause carried by [`UpdateState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Partition or component configuration is unusable
    Config,
    /// Image is malformed or fails a digest
    Format,
    /// Signed image targets a different platform or component
    Identity,
    /// Image matches none of the configured partition layouts
    InvalidImage,
    /// A hardware step did not complete within its retry budget
    HardwareTimeout,
    /// Platform or file I/O failed
    Io,
    /// Transport to a downstream controller failed
    Transport,
    /// The component does not implement the operation
    NotSupported,
    /// A stop was requested before the next step
    Stopped,
}

impl FailureReason {
    /// Status code reported for this reason.
    #[must_use]
    pub fn status(self) -> FwStatus {
        match self {
            Self::NotSupported => FwStatus::NotSupported,
            _ => FwStatus::Failure,
        }
    }

    /// Short name for logs and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Format => "format",
            Self::Identity => "identity",
            Self::InvalidImage => "invalid_image",
            Self::HardwareTimeout => "hardware_timeout",
            Self::Io => "io",
            Self::Transport => "transport",
            Self::NotSupported => "not_supported",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of a single update run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Nothing has happened yet
    #[default]
    Idle,
    /// Running format and signature checks
    Validating,
    /// Shutting the managed device down
    PoweringDown,
    /// Putting a co-processor into recovery mode
    EnteringServiceMode,
    /// Programming the image
    Writing,
    /// Confirming the new image took
    Verifying,
    /// Bringing the device back up
    RestoringPower,
    /// Update finished
    Done,
    /// Update stopped with a reason
    Failed(FailureReason),
}

impl UpdateState {
    /// Whether no further transition follows.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Whether this state touches hardware.
    #[must_use]
    pub fn is_hardware_phase(self) -> bool {
        matches!(
            self,
            Self::PoweringDown
                | Self::EnteringServiceMode
                | Self::Writing
                | Self::Verifying
                | Self::RestoringPower
        )
    }

    /// State name without the failure reason.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Validating => "Validating",
            Self::PoweringDown => "PoweringDown",
            Self::EnteringServiceMode => "EnteringServiceMode",
            Self::Writing => "Writing",
            Self::Verifying => "Verifying",
            Self::RestoringPower => "RestoringPower",
            Self::Done => "Done",
            Self::Failed(_) => "Failed",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "Failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One entry in an update's state history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// State entered
    pub state: UpdateState,
    /// When it was entered
    pub at: DateTime<Utc>,
}

/// Outcome and state history of one update run.
#[derive(Debug)]
pub struct UpdateReport {
    component: ComponentId,
    forced: bool,
    transitions: Vec<Transition>,
    error: Option<UpdateError>,
}

impl UpdateReport {
    pub(crate) fn new(component: ComponentId, forced: bool) -> Self {
        Self {
            component,
            forced,
            transitions: vec![Transition {
                state: UpdateState::Idle,
                at: Utc::now(),
            }],
            error: None,
        }
    }

    /// Report for a component that cannot be updated at all.
    #[must_use]
    pub fn not_supported(component: &ComponentId, operation: &'static str, forced: bool) -> Self {
        let mut report = Self::new(component.clone(), forced);
        report.fail(UpdateError::NotSupported {
            component: component.to_string(),
            operation,
        });
        report
    }

    pub(crate) fn enter(&mut self, state: UpdateState) {
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    pub(crate) fn fail(&mut self, error: UpdateError) {
        self.enter(UpdateState::Failed(error.reason()));
        self.error = Some(error);
    }

    /// Component the run targeted.
    #[must_use]
    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    /// Whether image checks were skipped.
    #[must_use]
    pub fn forced(&self) -> bool {
        self.forced
    }

    /// Every state entered, starting with [`UpdateState::Idle`].
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// States entered, in order.
    #[must_use]
    pub fn states(&self) -> Vec<UpdateState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    /// Whether the run entered `state` at any point.
    #[must_use]
    pub fn visited(&self, state: UpdateState) -> bool {
        self.transitions.iter().any(|t| t.state == state)
    }

    /// Last state entered.
    #[must_use]
    pub fn final_state(&self) -> UpdateState {
        self.transitions
            .last()
            .map_or(UpdateState::Idle, |t| t.state)
    }

    /// Whether the run reached [`UpdateState::Done`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.final_state() == UpdateState::Done
    }

    /// Error that failed the run, if any.
    #[must_use]
    pub fn error(&self) -> Option<&UpdateError> {
        self.error.as_ref()
    }

    /// Status code for the run.
    #[must_use]
    pub fn status(&self) -> FwStatus {
        match &self.error {
            Some(error) => error.reason().status(),
            None if self.is_success() => FwStatus::Success,
            None => FwStatus::Failure,
        }
    }

    /// Machine-readable summary for `--json` output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "component": self.component,
            "forced": self.forced,
            "status": self.status().code(),
            "final_state": self.final_state().as_str(),
            "reason": self.error.as_ref().map(UpdateError::reason),
            "error": self.error.as_ref().map(ToString::to_string),
            "transitions": self.transitions,
        })
    }

    /// Convert into a plain result, dropping the history.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the run.
    pub fn into_result(self) -> Result<(), UpdateError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
