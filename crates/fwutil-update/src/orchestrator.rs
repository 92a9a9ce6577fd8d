//! The update state machine.
//!
//! One [`UpdateOrchestrator`] drives one image into one component:
//!
//! 1. `Validating`: partition layout or signed-trailer checks (skipped when
//!    forced)
//! 2. `PoweringDown`: graceful shutdown, bounded wait, optional hard off
//! 3. `EnteringServiceMode`: recovery-mode request, bounded
//! 4. `Writing`: the injected [`FirmwareWriter`]
//! 5. `Verifying`: per family
//! 6. `RestoringPower`: power on or cycle
//!
//! Any error moves the run to `Failed`. If the host was powered down, power
//! is restored first. A [`StopFlag`] is honored before steps 2, 3 and 4 only.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use fwutil_image::{ImageDescriptorList, SignedImageVerifier};
use tracing::{error, info, warn};

use crate::component::ComponentId;
use crate::error::UpdateError;
use crate::family::{
    FamilyPolicy, OnPowerOffTimeout, OnServiceModeFailure, PowerDownPolicy, RestorePolicy,
    ServiceModePolicy, VerifyPolicy,
};
use crate::image::{FirmwareImage, StagedImage};
use crate::platform::{PlatformControl, PowerState};
use crate::retry::{RetryPolicy, StopFlag};
use crate::state::{UpdateReport, UpdateState};
use crate::writer::FirmwareWriter;

/// Checks run in `Validating`.
#[derive(Debug, Clone, Default)]
pub enum Validation {
    /// Only require the file to exist
    #[default]
    None,
    /// Image must match one of the partition layouts
    Layout(Arc<ImageDescriptorList>),
    /// Image must carry a valid signed trailer for this target; the verified
    /// payload is what gets written
    Signed(SignedImageVerifier),
}

impl Validation {
    /// Validate `image` and produce the file to write.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::InvalidImage`] when no layout matches, the
    /// trailer or identity failure as [`UpdateError::Format`], or an I/O error.
    pub fn stage(&self, image: &Path) -> Result<StagedImage, UpdateError> {
        let state = UpdateState::Validating;
        match self {
            Self::None => {
                fs::metadata(image).map_err(UpdateError::io(state, image))?;
                Ok(StagedImage::Original(image.to_path_buf()))
            }
            Self::Layout(layouts) => {
                let firmware = FirmwareImage::load(image).map_err(UpdateError::io(state, image))?;
                let descriptor =
                    layouts
                        .matching(firmware.bytes())
                        .ok_or_else(|| UpdateError::InvalidImage {
                            path: image.to_path_buf(),
                            layouts: layouts.len(),
                        })?;
                info!(
                    descriptor = descriptor.name(),
                    bytes = firmware.size(),
                    "image matches partition layout"
                );
                Ok(StagedImage::Original(image.to_path_buf()))
            }
            Self::Signed(verifier) => {
                let payload = verifier.extract_and_verify(image, false)?;
                Ok(StagedImage::Payload(payload.copy_payload()?))
            }
        }
    }
}

#[derive(Debug, Default)]
struct RunFlags {
    needs_restore: bool,
    service_mode_skipped: bool,
}

/// Sequences one update through the states of its family.
pub struct UpdateOrchestrator<'a> {
    component: ComponentId,
    family: FamilyPolicy,
    validation: Validation,
    writer: &'a dyn FirmwareWriter,
    platform: &'a dyn PlatformControl,
    stop: StopFlag,
}

impl<'a> UpdateOrchestrator<'a> {
    /// Orchestrator for `component` with no validation and no stop flag.
    #[must_use]
    pub fn new(
        component: ComponentId,
        family: FamilyPolicy,
        writer: &'a dyn FirmwareWriter,
        platform: &'a dyn PlatformControl,
    ) -> Self {
        Self {
            component,
            family,
            validation: Validation::None,
            writer,
            platform,
            stop: StopFlag::new(),
        }
    }

    /// Checks to run before touching hardware.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Flag checked between steps.
    #[must_use]
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Run the update of `image`. With `force`, `Validating` is skipped and
    /// a failed recovery-mode entry may be tolerated.
    #[must_use]
    pub fn run(&self, image: &Path, force: bool) -> UpdateReport {
        let mut report = UpdateReport::new(self.component.clone(), force);
        let mut flags = RunFlags::default();
        info!(
            fru = %self.component.fru,
            component = %self.component.name,
            image = %image.display(),
            force,
            "update started"
        );

        match self.sequence(image, force, &mut report, &mut flags) {
            Ok(()) => {
                self.enter(&mut report, UpdateState::Done);
                info!(fru = %self.component.fru, component = %self.component.name, "update completed");
            }
            Err(e) => {
                if flags.needs_restore {
                    self.restore_after_failure(&mut report, &flags);
                }
                error!(
                    fru = %self.component.fru,
                    component = %self.component.name,
                    reason = %e.reason(),
                    error = %e,
                    "update failed"
                );
                report.fail(e);
            }
        }
        report
    }

    fn sequence(
        &self,
        image: &Path,
        force: bool,
        report: &mut UpdateReport,
        flags: &mut RunFlags,
    ) -> Result<(), UpdateError> {
        let staged = if force {
            warn!(component = %self.component, "forced update, skipping image validation");
            StagedImage::Original(image.to_path_buf())
        } else {
            self.enter(report, UpdateState::Validating);
            self.validation.stage(image)?
        };

        if let Some(policy) = &self.family.power_down {
            self.check_stop(UpdateState::PoweringDown)?;
            self.enter(report, UpdateState::PoweringDown);
            self.power_down(policy)?;
            flags.needs_restore = true;
        }

        if let Some(policy) = &self.family.service_mode {
            self.check_stop(UpdateState::EnteringServiceMode)?;
            self.enter(report, UpdateState::EnteringServiceMode);
            if let Err(e) = self.enter_service_mode(policy) {
                if force && policy.on_failure == OnServiceModeFailure::ProceedIfForced {
                    warn!(
                        component = %self.component,
                        error = %e,
                        "recovery mode not entered, continuing forced update"
                    );
                    flags.service_mode_skipped = true;
                } else {
                    return Err(e);
                }
            }
        }

        self.check_stop(UpdateState::Writing)?;
        self.enter(report, UpdateState::Writing);
        self.writer.write(staged.path())?;
        drop(staged);

        self.enter(report, UpdateState::Verifying);
        self.verify()?;

        let action = self
            .family
            .restore_action(flags.needs_restore, flags.service_mode_skipped);
        if action != RestorePolicy::Nothing {
            flags.needs_restore = false;
            self.enter(report, UpdateState::RestoringPower);
            self.restore(action)?;
        }
        Ok(())
    }

    fn enter(&self, report: &mut UpdateReport, state: UpdateState) {
        report.enter(state);
        info!(
            fru = %self.component.fru,
            component = %self.component.name,
            state = %state,
            "update state changed"
        );
    }

    fn check_stop(&self, next: UpdateState) -> Result<(), UpdateError> {
        if self.stop.is_stopped() {
            warn!(component = %self.component, state = %next, "stop requested");
            return Err(UpdateError::Stopped { state: next });
        }
        Ok(())
    }

    fn is_powered_off(&self, budget: RetryPolicy) -> bool {
        budget.poll(|| {
            self.platform
                .get_power_status(&self.component.fru)
                .map(|status| status == PowerState::Off)
        })
    }

    fn power_down(&self, policy: &PowerDownPolicy) -> Result<(), UpdateError> {
        let state = UpdateState::PoweringDown;
        let fru = self.component.fru.as_str();
        if matches!(self.platform.get_power_status(fru), Ok(PowerState::Off)) {
            info!(fru, "host already powered off");
            return Ok(());
        }

        self.family
            .step_retry
            .retry(|| self.platform.graceful_shutdown(fru))
            .map_err(UpdateError::platform(state))?;
        if self.is_powered_off(policy.budget) {
            return Ok(());
        }

        match policy.on_timeout {
            OnPowerOffTimeout::Abort => Err(UpdateError::HardwareTimeout {
                state,
                operation: "graceful power off",
            }),
            OnPowerOffTimeout::HardOffAndRetryOnce => {
                warn!(fru, "graceful shutdown timed out, forcing power off");
                self.family
                    .step_retry
                    .retry(|| self.platform.power_off(fru))
                    .map_err(UpdateError::platform(state))?;
                if self.is_powered_off(policy.budget) {
                    Ok(())
                } else {
                    Err(UpdateError::HardwareTimeout {
                        state,
                        operation: "forced power off",
                    })
                }
            }
        }
    }

    fn enter_service_mode(&self, policy: &ServiceModePolicy) -> Result<(), UpdateError> {
        let fru = self.component.fru.as_str();
        policy
            .budget
            .retry(|| self.platform.enter_recovery_mode(fru))
            .map_err(|e| {
                warn!(fru, error = %e, "recovery mode request failed");
                UpdateError::HardwareTimeout {
                    state: UpdateState::EnteringServiceMode,
                    operation: "recovery mode entry",
                }
            })
    }

    fn verify(&self) -> Result<(), UpdateError> {
        match self.family.verify {
            VerifyPolicy::TrustWriter => Ok(()),
            VerifyPolicy::WaitBootComplete(budget) => {
                let fru = self.component.fru.as_str();
                if budget.poll(|| self.platform.is_boot_complete(fru)) {
                    Ok(())
                } else {
                    Err(UpdateError::HardwareTimeout {
                        state: UpdateState::Verifying,
                        operation: "boot complete",
                    })
                }
            }
        }
    }

    fn restore(&self, action: RestorePolicy) -> Result<(), UpdateError> {
        let fru = self.component.fru.as_str();
        let retry = self.family.step_retry;
        let result = match action {
            RestorePolicy::Nothing => return Ok(()),
            RestorePolicy::PowerOn => retry.retry(|| self.platform.power_on(fru)),
            RestorePolicy::PowerCycle => {
                info!(fru, "power cycling to recover host state");
                retry.retry(|| self.platform.power_cycle(fru))
            }
        };
        result.map_err(UpdateError::platform(UpdateState::RestoringPower))
    }

    fn restore_after_failure(&self, report: &mut UpdateReport, flags: &RunFlags) {
        let action = self
            .family
            .restore_action(true, flags.service_mode_skipped);
        self.enter(report, UpdateState::RestoringPower);
        if let Err(e) = self.restore(action) {
            error!(component = %self.component, error = %e, "failed to restore power after failed update");
        }
    }
}
