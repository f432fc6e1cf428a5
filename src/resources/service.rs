//! Systemd unit enablement and activity.
use std::sync::Arc;

use super::run_privileged;
use crate::error::ActionError;
use crate::exec::Executor;
use crate::platform::Privilege;

/// Enables, disables, starts and stops systemd units.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceManager: Send + Sync + std::fmt::Debug {
    /// Enable `unit` at boot.
    ///
    /// # Errors
    ///
    /// Returns an error if `systemctl` fails.
    fn enable(&self, unit: &str) -> Result<(), ActionError>;

    /// Disable `unit` at boot.
    ///
    /// # Errors
    ///
    /// Returns an error if `systemctl` fails.
    fn disable(&self, unit: &str) -> Result<(), ActionError>;

    /// Start `unit` now.
    ///
    /// # Errors
    ///
    /// Returns an error if `systemctl` fails.
    fn start(&self, unit: &str) -> Result<(), ActionError>;

    /// Stop `unit` now.
    ///
    /// # Errors
    ///
    /// Returns an error if `systemctl` fails.
    fn stop(&self, unit: &str) -> Result<(), ActionError>;
}

/// [`ServiceManager`] backed by `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    executor: Arc<dyn Executor>,
    privilege: Privilege,
}

impl Systemctl {
    /// Create a systemctl front-end.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            executor,
            privilege,
        }
    }

    fn systemctl(&self, verb: &str, unit: &str) -> Result<(), ActionError> {
        run_privileged(&*self.executor, self.privilege, "systemctl", &[verb, unit]).map(|_| ())
    }
}

impl ServiceManager for Systemctl {
    fn enable(&self, unit: &str) -> Result<(), ActionError> {
        self.systemctl("enable", unit)
    }

    fn disable(&self, unit: &str) -> Result<(), ActionError> {
        self.systemctl("disable", unit)
    }

    fn start(&self, unit: &str) -> Result<(), ActionError> {
        self.systemctl("start", unit)
    }

    fn stop(&self, unit: &str) -> Result<(), ActionError> {
        self.systemctl("stop", unit)
    }
}
