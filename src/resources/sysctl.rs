//! Kernel parameters: runtime value plus a persistent sysctl.d drop-in.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::fs::{FileSystem as _, SystemFs};
use super::helpers::fs::upsert_sysctl_line;
use super::run_privileged;
use crate::error::ActionError;
use crate::exec::Executor;
use crate::platform::Privilege;

/// Drop-in file that persists managed parameters across reboots.
pub const DEFAULT_DROPIN: &str = "/etc/sysctl.d/90-provision.conf";

/// Sets kernel parameters.
#[cfg_attr(test, mockall::automock)]
pub trait SysctlManager: Send + Sync + std::fmt::Debug {
    /// Set `key` to `value` now and on every subsequent boot.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime value cannot be set or the drop-in
    /// cannot be updated.
    fn set(&self, key: &str, value: &str) -> Result<(), ActionError>;
}

/// [`SysctlManager`] backed by `sysctl -w` and a drop-in file.
///
/// The drop-in is read and written through [`SystemFs`], so it follows the
/// same privilege rules as managed files.
#[derive(Debug, Clone)]
pub struct Sysctl {
    executor: Arc<dyn Executor>,
    privilege: Privilege,
    fs: SystemFs,
    dropin: PathBuf,
}

impl Sysctl {
    /// Create a sysctl front-end persisting to [`DEFAULT_DROPIN`].
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            fs: SystemFs::new(Arc::clone(&executor), privilege),
            executor,
            privilege,
            dropin: PathBuf::from(DEFAULT_DROPIN),
        }
    }

    /// Persist to `dropin` instead.
    #[must_use]
    pub fn with_dropin(mut self, dropin: impl Into<PathBuf>) -> Self {
        self.dropin = dropin.into();
        self
    }

    /// Path of the drop-in file.
    #[must_use]
    pub fn dropin(&self) -> &Path {
        &self.dropin
    }

    fn persist(&self, key: &str, value: &str) -> Result<(), ActionError> {
        let current = self.fs.read_to_string(&self.dropin)?.unwrap_or_default();
        let updated = upsert_sysctl_line(&current, key, value);
        if updated == current {
            return Ok(());
        }
        self.fs.write(&self.dropin, updated.as_bytes())
    }
}

impl SysctlManager for Sysctl {
    fn set(&self, key: &str, value: &str) -> Result<(), ActionError> {
        let assignment = format!("{key}={value}");
        run_privileged(&*self.executor, self.privilege, "sysctl", &["-w", &assignment])?;
        self.persist(key, value)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;

    fn sysctl(exec: &Arc<MockExecutor>, dropin: &Path) -> Sysctl {
        Sysctl::new(Arc::clone(exec) as Arc<dyn Executor>, Privilege::Root).with_dropin(dropin)
    }

    #[test]
    fn default_dropin_path() {
        let exec = Arc::new(MockExecutor::with_responses(vec![]));
        let s = Sysctl::new(exec, Privilege::Root);
        assert_eq!(s.dropin(), Path::new(DEFAULT_DROPIN));
    }

    #[test]
    fn set_writes_runtime_value_and_creates_dropin() {
        let dir = tempfile::tempdir().unwrap();
        let dropin = dir.path().join("sysctl.d/90-provision.conf");
        let exec = Arc::new(MockExecutor::ok("vm.swappiness = 10"));

        sysctl(&exec, &dropin).set("vm.swappiness", "10").unwrap();

        assert_eq!(exec.calls(), vec!["sysctl -w vm.swappiness=10"]);
        assert_eq!(
            std::fs::read_to_string(&dropin).unwrap(),
            "vm.swappiness = 10\n"
        );
    }

    #[test]
    fn set_updates_existing_dropin_line() {
        let dir = tempfile::tempdir().unwrap();
        let dropin = dir.path().join("90-provision.conf");
        std::fs::write(&dropin, "kernel.sysrq = 1\nvm.swappiness = 60\n").unwrap();
        let exec = Arc::new(MockExecutor::ok(""));

        sysctl(&exec, &dropin).set("vm.swappiness", "10").unwrap();

        assert_eq!(
            std::fs::read_to_string(&dropin).unwrap(),
            "kernel.sysrq = 1\nvm.swappiness = 10\n"
        );
    }

    #[test]
    fn sudo_persists_dropin_through_sudo() {
        let dir = tempfile::tempdir().unwrap();
        let dropin = dir.path().join("sysctl.d/90-provision.conf");
        let exec = Arc::new(MockExecutor::with_responses(vec![
            (true, "vm.swappiness = 10".to_string()),
            (true, String::new()),
            (true, String::new()),
        ]));

        Sysctl::new(Arc::clone(&exec) as Arc<dyn Executor>, Privilege::Sudo)
            .with_dropin(&dropin)
            .set("vm.swappiness", "10")
            .unwrap();

        let calls = exec.calls();
        assert_eq!(calls.len(), 3, "{calls:?}");
        assert_eq!(calls[0], "sudo sysctl -w vm.swappiness=10");
        assert!(calls[1].starts_with("sudo install -D -m 644 "), "{}", calls[1]);
        assert!(
            calls[2].starts_with("sudo mv -f -T ") && calls[2].ends_with(&dropin.display().to_string()),
            "{}",
            calls[2]
        );
    }

    #[test]
    fn dropin_already_current_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let dropin = dir.path().join("90-provision.conf");
        std::fs::write(&dropin, "vm.swappiness = 10\n").unwrap();
        let exec = Arc::new(MockExecutor::ok(""));

        Sysctl::new(Arc::clone(&exec) as Arc<dyn Executor>, Privilege::Sudo)
            .with_dropin(&dropin)
            .set("vm.swappiness", "10")
            .unwrap();

        assert_eq!(exec.calls(), vec!["sudo sysctl -w vm.swappiness=10"]);
    }

    #[test]
    fn runtime_failure_leaves_dropin_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dropin = dir.path().join("90-provision.conf");
        let exec = Arc::new(MockExecutor::fail(
            "sysctl: cannot stat /proc/sys/vm/nosuch: No such file or directory",
        ));

        let err = sysctl(&exec, &dropin).set("vm.nosuch", "1").unwrap_err();

        assert!(!err.is_transient());
        assert!(!dropin.exists());
    }
}
