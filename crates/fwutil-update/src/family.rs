//! Per-family sequencing policy.
//!
//! A family decides which optional states run and how each hardware wait
//! ends. The orchestrator itself is family-agnostic.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Update families with built-in policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Host SPI flash behind the management engine
    Bios,
    /// The BMC's own flash
    Bmc,
    /// Flash reached by switching a GPIO mux and binding a SPI driver
    GpioSwitchedFlash,
    /// Components updated through a bridge controller
    Pldm,
}

impl Family {
    /// Built-in policy for the family.
    #[must_use]
    pub fn policy(self) -> FamilyPolicy {
        match self {
            Self::Bios => FamilyPolicy {
                power_down: Some(PowerDownPolicy {
                    budget: RetryPolicy::seconds(30),
                    on_timeout: OnPowerOffTimeout::HardOffAndRetryOnce,
                }),
                service_mode: Some(ServiceModePolicy {
                    budget: RetryPolicy::seconds(10),
                    on_failure: OnServiceModeFailure::ProceedIfForced,
                }),
                verify: VerifyPolicy::TrustWriter,
                restore: RestorePolicy::PowerOn,
                step_retry: RetryPolicy::default(),
            },
            Self::Bmc => FamilyPolicy::default(),
            Self::GpioSwitchedFlash => FamilyPolicy {
                power_down: Some(PowerDownPolicy {
                    budget: RetryPolicy::seconds(30),
                    on_timeout: OnPowerOffTimeout::Abort,
                }),
                restore: RestorePolicy::PowerOn,
                ..FamilyPolicy::default()
            },
            Self::Pldm => FamilyPolicy::default(),
        }
    }

    /// Family name as used in the component table.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Bmc => "bmc",
            Self::GpioSwitchedFlash => "gpio_switched_flash",
            Self::Pldm => "pldm",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the host does not power off in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnPowerOffTimeout {
    /// Fail with a hardware timeout
    Abort,
    /// Force power off and wait one more budget
    HardOffAndRetryOnce,
}

/// How `PoweringDown` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerDownPolicy {
    /// Power-status polling budget
    pub budget: RetryPolicy,
    /// Behavior when the budget runs out
    pub on_timeout: OnPowerOffTimeout,
}

/// What to do when recovery mode cannot be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnServiceModeFailure {
    /// Always fail the update
    Abort,
    /// Continue a forced update and power cycle afterwards
    ProceedIfForced,
}

/// How `EnteringServiceMode` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceModePolicy {
    /// Attempts at entering recovery mode
    pub budget: RetryPolicy,
    /// Behavior when every attempt fails
    pub on_failure: OnServiceModeFailure,
}

/// How `Verifying` decides the write took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// The writer's own verification (or the transport ack) is sufficient
    TrustWriter,
    /// Poll for boot complete within the budget
    WaitBootComplete(RetryPolicy),
}

/// How `RestoringPower` brings the device back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Leave power alone
    Nothing,
    /// Power on
    PowerOn,
    /// Power cycle
    PowerCycle,
}

/// Sequencing choices for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyPolicy {
    /// `PoweringDown` behavior; `None` skips the state
    pub power_down: Option<PowerDownPolicy>,
    /// `EnteringServiceMode` behavior; `None` skips the state
    pub service_mode: Option<ServiceModePolicy>,
    /// `Verifying` behavior
    pub verify: VerifyPolicy,
    /// `RestoringPower` behavior after a successful write
    pub restore: RestorePolicy,
    /// Retries for single platform calls (shutdown request, power on)
    pub step_retry: RetryPolicy,
}

impl Default for FamilyPolicy {
    fn default() -> Self {
        Self {
            power_down: None,
            service_mode: None,
            verify: VerifyPolicy::TrustWriter,
            restore: RestorePolicy::Nothing,
            step_retry: RetryPolicy::default(),
        }
    }
}

impl FamilyPolicy {
    /// Replace the power-down behavior.
    #[must_use]
    pub fn with_power_down(mut self, power_down: Option<PowerDownPolicy>) -> Self {
        self.power_down = power_down;
        self
    }

    /// Replace the service-mode behavior.
    #[must_use]
    pub fn with_service_mode(mut self, service_mode: Option<ServiceModePolicy>) -> Self {
        self.service_mode = service_mode;
        self
    }

    /// Replace the verify behavior.
    #[must_use]
    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Replace the restore behavior.
    #[must_use]
    pub fn with_restore(mut self, restore: RestorePolicy) -> Self {
        self.restore = restore;
        self
    }

    /// Use `interval` between attempts of every budget, keeping the counts.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if let Some(power_down) = self.power_down.as_mut() {
            power_down.budget = power_down.budget.with_interval(interval);
        }
        if let Some(service_mode) = self.service_mode.as_mut() {
            service_mode.budget = service_mode.budget.with_interval(interval);
        }
        if let VerifyPolicy::WaitBootComplete(budget) = &mut self.verify {
            *budget = budget.with_interval(interval);
        }
        self.step_retry = self.step_retry.with_interval(interval);
        self
    }

    /// Restore action after the run, given whether power was taken down and
    /// whether a forced update went ahead without recovery mode.
    #[must_use]
    pub fn restore_action(&self, powered_down: bool, service_mode_skipped: bool) -> RestorePolicy {
        if service_mode_skipped {
            return RestorePolicy::PowerCycle;
        }
        match self.restore {
            RestorePolicy::Nothing if powered_down => RestorePolicy::PowerOn,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bios_escalates_and_proceeds_when_forced() {
        let policy = Family::Bios.policy();
        assert_eq!(
            policy.power_down.map(|p| p.on_timeout),
            Some(OnPowerOffTimeout::HardOffAndRetryOnce)
        );
        assert_eq!(
            policy.service_mode.map(|s| s.on_failure),
            Some(OnServiceModeFailure::ProceedIfForced)
        );
        assert_eq!(policy.restore_action(true, false), RestorePolicy::PowerOn);
        assert_eq!(policy.restore_action(true, true), RestorePolicy::PowerCycle);
    }

    #[test]
    fn test_bmc_and_pldm_do_not_sequence_power() {
        for family in [Family::Bmc, Family::Pldm] {
            let policy = family.policy();
            assert!(policy.power_down.is_none());
            assert!(policy.service_mode.is_none());
            assert_eq!(policy.restore_action(false, false), RestorePolicy::Nothing);
        }
    }

    #[test]
    fn test_gpio_switched_flash_aborts_on_timeout() {
        let policy = Family::GpioSwitchedFlash.policy();
        assert_eq!(
            policy.power_down.map(|p| p.on_timeout),
            Some(OnPowerOffTimeout::Abort)
        );
        assert!(policy.service_mode.is_none());
    }

    #[test]
    fn test_powered_down_always_restores_something() {
        let policy = FamilyPolicy::default();
        assert_eq!(policy.restore_action(true, false), RestorePolicy::PowerOn);
    }

    #[test]
    fn test_with_interval_keeps_attempts() {
        let policy = Family::Bios.policy().with_interval(Duration::ZERO);
        assert_eq!(
            policy.power_down.map(|p| p.budget),
            Some(RetryPolicy::new(30, Duration::ZERO))
        );
        assert_eq!(policy.step_retry.interval, Duration::ZERO);
    }
}
