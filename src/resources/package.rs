//! Package installation and removal through dnf.
use std::sync::Arc;

use super::run_privileged;
use crate::error::ActionError;
use crate::exec::Executor;
use crate::platform::Privilege;

/// Installs, removes and upgrades packages.
#[cfg_attr(test, mockall::automock)]
pub trait PackageManager: Send + Sync + std::fmt::Debug {
    /// Install packages by name, URL or local RPM path.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager fails; download and lock
    /// problems are transient.
    fn install(&self, names: &[String]) -> Result<(), ActionError>;

    /// Remove installed packages.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager fails.
    fn remove(&self, names: &[String]) -> Result<(), ActionError>;

    /// Upgrade every installed package.
    ///
    /// # Errors
    ///
    /// Returns an error if the package manager fails.
    fn upgrade(&self) -> Result<(), ActionError>;
}

/// [`PackageManager`] backed by `dnf -y`.
#[derive(Debug, Clone)]
pub struct Dnf {
    executor: Arc<dyn Executor>,
    privilege: Privilege,
}

impl Dnf {
    /// Create a dnf front-end.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            executor,
            privilege,
        }
    }

    fn dnf(&self, subcommand: &str, names: &[String]) -> Result<(), ActionError> {
        let mut args = vec![subcommand, "-y"];
        args.extend(names.iter().map(String::as_str));
        run_privileged(&*self.executor, self.privilege, "dnf", &args).map(|_| ())
    }
}

impl PackageManager for Dnf {
    fn install(&self, names: &[String]) -> Result<(), ActionError> {
        if names.is_empty() {
            return Ok(());
        }
        self.dnf("install", names)
    }

    fn remove(&self, names: &[String]) -> Result<(), ActionError> {
        if names.is_empty() {
            return Ok(());
        }
        self.dnf("remove", names)
    }

    fn upgrade(&self) -> Result<(), ActionError> {
        self.dnf("upgrade", &[])
    }
}
