//! Install lifecycle: boot from install media, wait for the installer to
//! power the guest off, then point the domain at its own disk.
//!
//! ```text
//! Defined ──start──▶ Booting ──▶ Polling ──(state leaves running/blocked)──▶ Finished
//!                                   │                                         │
//!                                   └──(budget exhausted)──▶ TimedOut          └─▶ redefine(hd)
//! ```
//!
//! Media variants only differ in what gets attached; the loop itself is shared.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::control::ControlPlane;
use crate::diagnostics::DiagnosticCapture;
use crate::domain::{BootSource, DomainBuilder};
use crate::error::{Error, Result};
use crate::media::InstallMedia;

/// Default poll budget: 1200 one-second ticks, about 20 minutes.
pub const DEFAULT_POLL_BUDGET: u32 = 1200;

/// Lifecycle state of one install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Defined,
    Booting,
    Polling,
    Finished,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct InstallSettings {
    /// Maximum number of run-state polls.
    pub poll_budget: u32,
    pub poll_interval: Duration,
    /// Where timeout screenshots are written.
    pub screenshot_dir: PathBuf,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            poll_budget: DEFAULT_POLL_BUDGET,
            poll_interval: Duration::from_secs(1),
            screenshot_dir: PathBuf::from("."),
        }
    }
}

/// Outcome of a finished install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub name: String,
    /// Run-state queries issued, including the one that saw the guest stop.
    pub polls: u32,
}

pub struct InstallController<'a> {
    control: &'a dyn ControlPlane,
    builder: &'a DomainBuilder<'a>,
    diagnostics: &'a dyn DiagnosticCapture,
    settings: InstallSettings,
    cancel: CancelToken,
}

impl<'a> InstallController<'a> {
    pub fn new(
        control: &'a dyn ControlPlane,
        builder: &'a DomainBuilder<'a>,
        diagnostics: &'a dyn DiagnosticCapture,
        settings: InstallSettings,
    ) -> Self {
        Self {
            control,
            builder,
            diagnostics,
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn transition(&self, state: InstallState) {
        debug!(guest = self.builder.name(), ?state, "install state");
    }

    /// Run one install from `media`.
    ///
    /// On success the domain has been redefined to boot from its disk with
    /// the medium detached; it is not started.
    pub fn install(&self, media: &dyn InstallMedia) -> Result<InstallReport> {
        let name = self.builder.name();
        let medium = media.install_medium();
        if !medium.path.is_file() {
            return Err(Error::media(
                &medium.path,
                "install medium has not been prepared",
            ));
        }

        info!(guest = name, medium = %medium.path.display(), "running install");
        let install_descriptor = self.builder.define(&BootSource::Medium(medium))?;
        self.transition(InstallState::Defined);

        self.control.start_domain(name)?;
        self.transition(InstallState::Booting);

        match self.wait_for_install_finish()? {
            (InstallState::Finished, polls) => {
                self.transition(InstallState::Finished);
                self.builder.define(&BootSource::HardDisk)?;
                self.transition(InstallState::Defined);
                info!(guest = name, polls, "install finished");
                Ok(InstallReport {
                    name: name.to_string(),
                    polls,
                })
            }
            (_, polls) => {
                self.transition(InstallState::TimedOut);
                let descriptor = timeout_descriptor(self.control.domain_descriptor(name), || {
                    install_descriptor.to_xml()
                });
                let screenshot = self.screenshot_path();
                self.diagnostics.capture(&descriptor, &screenshot);
                error!(guest = name, polls, "timed out waiting for install to finish");
                Err(Error::InstallTimeout {
                    name: name.to_string(),
                    polls,
                })
            }
        }
    }

    fn wait_for_install_finish(&self) -> Result<(InstallState, u32)> {
        let name = self.builder.name();
        let budget = self.settings.poll_budget;
        self.transition(InstallState::Polling);

        for poll in 1..=budget {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let remaining = budget - poll + 1;
            if remaining % 10 == 0 {
                info!(guest = name, remaining, budget, "waiting for install to finish");
            }

            match self.control.domain_state(name) {
                Ok(state) if state.is_active() => {}
                Ok(state) => {
                    debug!(guest = name, %state, poll, "guest left running state");
                    return Ok((InstallState::Finished, poll));
                }
                Err(e) => debug!(guest = name, error = %e, poll, "state query failed, retrying"),
            }

            if poll < budget && !self.settings.poll_interval.is_zero() {
                thread::sleep(self.settings.poll_interval);
            }
        }

        Ok((InstallState::TimedOut, budget))
    }

    /// Start the installed guest from its disk.
    pub fn boot_installed(&self) -> Result<()> {
        info!(guest = self.builder.name(), "booting installed guest");
        self.control.start_domain(self.builder.name())
    }

    fn screenshot_path(&self) -> PathBuf {
        let stamp = OffsetDateTime::now_utc().unix_timestamp();
        self.settings
            .screenshot_dir
            .join(format!("{}-{stamp}.png", self.builder.name()))
    }
}

/// Descriptor handed to diagnostics after a timeout: the live one, else the
/// defined one, else empty. Never fails, so the timeout stays the reported error.
fn timeout_descriptor(live: Result<String>, defined: impl FnOnce() -> Result<String>) -> String {
    let e = match live {
        Ok(xml) => return xml,
        Err(e) => e,
    };
    warn!(error = %e, "live descriptor unavailable, using defined one");
    defined().unwrap_or_else(|e| {
        warn!(error = %e, "defined descriptor unavailable, capturing without one");
        String::new()
    })
}
