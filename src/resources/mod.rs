//! Collaborators that mutate the host: packages, files, services, sysctl.
//!
//! Each concern is a trait with one production implementation that shells
//! out through the [`Executor`] (or touches the filesystem directly).  The
//! applier only sees the traits, so tests substitute an in-memory host.
pub mod fs;
pub mod package;
pub mod service;
pub mod sysctl;

/// Helpers shared by collaborator implementations.
pub mod helpers {
    pub mod fs;
}

pub use fs::{FileSystem, SystemFs};
pub use package::{Dnf, PackageManager};
pub use service::{ServiceManager, Systemctl};
pub use sysctl::{Sysctl, SysctlManager};

use crate::error::ActionError;
use crate::exec::{ExecResult, Executor};
use crate::platform::Privilege;

/// Run a mutating command with the configured privilege, classifying
/// failures.
///
/// The error message names the command without the `sudo` prefix.
///
/// # Errors
///
/// Returns an [`ActionError`] if the command cannot be spawned or exits
/// non-zero; the output decides whether it is transient.
pub fn run_privileged(
    executor: &dyn Executor,
    privilege: Privilege,
    program: &str,
    args: &[&str],
) -> Result<ExecResult, ActionError> {
    let label = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    let (program, args) = privilege.command(program, args);
    tracing::debug!("running: {label}");
    let result = executor
        .run_unchecked(program, &args)
        .map_err(|e| ActionError::spawn(&label, &e))?;
    if result.success {
        Ok(result)
    } else {
        Err(ActionError::from_exec(&label, &result))
    }
}

/// In-memory host shared by collaborator and applier tests.
#[cfg(test)]
pub mod test_helpers {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use super::{FileSystem, PackageManager, ServiceManager, SysctlManager};
    use crate::config::entry::{self, Mode};
    use crate::error::ActionError;
    use crate::state::{Enablement, Inspector, Observation, ObservedAttributes};

    #[derive(Debug, Default)]
    struct Model {
        packages: HashSet<String>,
        files: HashMap<PathBuf, (Vec<u8>, ObservedAttributes)>,
        dirs: HashMap<PathBuf, ObservedAttributes>,
        services: HashMap<String, (Enablement, bool)>,
        sysctls: HashMap<String, String>,
        failures: HashMap<String, VecDeque<ActionError>>,
        broken_inspection: HashSet<String>,
        mutations: Vec<String>,
        bulk_queries: usize,
        upgrades: usize,
    }

    fn default_attrs(mode: u32) -> ObservedAttributes {
        ObservedAttributes {
            mode: Mode(mode),
            owner: "root".to_string(),
            group: "root".to_string(),
        }
    }

    /// A fake host implementing every collaborator trait.
    ///
    /// Mutations are recorded as strings such as `"install git"` or
    /// `"write /etc/motd"`.  A failure queued for the same string is
    /// returned (once per queued error) instead of applying the mutation.
    #[derive(Debug, Default)]
    pub struct FakeHost {
        model: Mutex<Model>,
    }

    impl FakeHost {
        /// An empty host.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn model(&self) -> MutexGuard<'_, Model> {
            self.model.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Mark `name` as installed.
        #[must_use]
        pub fn with_package(self, name: &str) -> Self {
            self.model().packages.insert(name.to_string());
            self
        }

        /// Add a regular file with root ownership and the given mode.
        #[must_use]
        pub fn with_file(self, path: &str, content: &str, mode: u32) -> Self {
            self.model().files.insert(
                PathBuf::from(path),
                (content.as_bytes().to_vec(), default_attrs(mode)),
            );
            self
        }

        /// Add a directory with root ownership and the given mode.
        #[must_use]
        pub fn with_dir(self, path: &str, mode: u32) -> Self {
            self.model()
                .dirs
                .insert(PathBuf::from(path), default_attrs(mode));
            self
        }

        /// Add a unit with the given enablement and activity.
        #[must_use]
        pub fn with_service(self, unit: &str, enabled: bool, active: bool) -> Self {
            let enablement = if enabled {
                Enablement::Enabled
            } else {
                Enablement::Disabled
            };
            self.model()
                .services
                .insert(unit.to_string(), (enablement, active));
            self
        }

        /// Add a unit with no install section (`systemctl is-enabled` says
        /// `static`).
        #[must_use]
        pub fn with_static_service(self, unit: &str, active: bool) -> Self {
            self.model()
                .services
                .insert(unit.to_string(), (Enablement::Fixed, active));
            self
        }

        /// Add a kernel parameter.
        #[must_use]
        pub fn with_sysctl(self, key: &str, value: &str) -> Self {
            self.model()
                .sysctls
                .insert(key.to_string(), value.to_string());
            self
        }

        /// Queue `error` for the next mutation recorded as `op`.
        #[must_use]
        pub fn failing(self, op: &str, error: ActionError) -> Self {
            self.model()
                .failures
                .entry(op.to_string())
                .or_default()
                .push_back(error);
            self
        }

        /// Make every inspection of `target` fail.
        #[must_use]
        pub fn failing_inspection(self, target: &str) -> Self {
            self.model().broken_inspection.insert(target.to_string());
            self
        }

        /// Every mutation attempted so far, including failed ones.
        #[must_use]
        pub fn mutations(&self) -> Vec<String> {
            self.model().mutations.clone()
        }

        /// Number of bulk package queries served.
        #[must_use]
        pub fn bulk_package_queries(&self) -> usize {
            self.model().bulk_queries
        }

        /// Number of upgrades performed.
        #[must_use]
        pub fn upgrades(&self) -> usize {
            self.model().upgrades
        }

        /// Whether `name` is installed.
        #[must_use]
        pub fn has_package(&self, name: &str) -> bool {
            self.model().packages.contains(name)
        }

        /// Content of the file at `path`, if any.
        #[must_use]
        pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
            self.model()
                .files
                .get(Path::new(path))
                .map(|(bytes, _)| bytes.clone())
        }

        /// Record `op` and return its queued failure, if any.
        fn mutate(&self, op: String) -> Result<MutexGuard<'_, Model>, ActionError> {
            let mut model = self.model();
            let failure = model.failures.get_mut(&op).and_then(VecDeque::pop_front);
            model.mutations.push(op);
            failure.map_or(Ok(model), Err)
        }

        fn inspect(&self, target: &str) -> Result<MutexGuard<'_, Model>, ActionError> {
            let model = self.model();
            if model.broken_inspection.contains(target) {
                return Err(ActionError::permanent(format!("cannot inspect {target}")));
            }
            Ok(model)
        }

        fn observe_path(&self, path: &Path) -> Result<Observation, ActionError> {
            let model = self.inspect(&path.to_string_lossy())?;
            if let Some((bytes, attrs)) = model.files.get(path) {
                return Ok(Observation::File {
                    digest: entry::sha256_hex(bytes),
                    attrs: attrs.clone(),
                });
            }
            Ok(model
                .dirs
                .get(path)
                .map_or(Observation::Absent, |attrs| Observation::Directory {
                    attrs: attrs.clone(),
                }))
        }

        fn attrs_mut<'a>(model: &'a mut Model, path: &Path) -> Result<&'a mut ObservedAttributes, ActionError> {
            if let Some((_, attrs)) = model.files.get_mut(path) {
                return Ok(attrs);
            }
            model
                .dirs
                .get_mut(path)
                .ok_or_else(|| ActionError::permanent(format!("{}: no such file", path.display())))
        }
    }

    impl Inspector for FakeHost {
        fn installed_packages(&self) -> Result<HashSet<String>, ActionError> {
            let mut model = self.model();
            model.bulk_queries += 1;
            Ok(model.packages.clone())
        }

        fn package(&self, name: &str) -> Result<Observation, ActionError> {
            let model = self.inspect(name)?;
            Ok(if model.packages.contains(name) {
                Observation::Package
            } else {
                Observation::Absent
            })
        }

        fn file(&self, path: &Path) -> Result<Observation, ActionError> {
            self.observe_path(path)
        }

        fn directory(&self, path: &Path) -> Result<Observation, ActionError> {
            self.observe_path(path)
        }

        fn service(&self, unit: &str) -> Result<Observation, ActionError> {
            let model = self.inspect(unit)?;
            Ok(model
                .services
                .get(unit)
                .map_or(Observation::Absent, |&(enablement, active)| {
                    Observation::Service { enablement, active }
                }))
        }

        fn sysctl(&self, key: &str) -> Result<Observation, ActionError> {
            let model = self.inspect(key)?;
            Ok(model
                .sysctls
                .get(key)
                .map_or(Observation::Absent, |value| Observation::Sysctl {
                    value: value.clone(),
                }))
        }
    }

    impl PackageManager for FakeHost {
        fn install(&self, names: &[String]) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("install {}", names.join(" ")))?;
            model.packages.extend(names.iter().cloned());
            Ok(())
        }

        fn remove(&self, names: &[String]) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("remove {}", names.join(" ")))?;
            for name in names {
                model.packages.remove(name);
            }
            Ok(())
        }

        fn upgrade(&self) -> Result<(), ActionError> {
            let mut model = self.mutate("upgrade".to_string())?;
            model.upgrades += 1;
            Ok(())
        }
    }

    impl FileSystem for FakeHost {
        fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("write {}", path.display()))?;
            let attrs = model
                .files
                .get(path)
                .map_or_else(|| default_attrs(0o644), |(_, a)| a.clone());
            model.files.insert(path.to_path_buf(), (bytes.to_vec(), attrs));
            Ok(())
        }

        fn chmod(&self, path: &Path, mode: Mode) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("chmod {mode} {}", path.display()))?;
            Self::attrs_mut(&mut model, path)?.mode = mode;
            Ok(())
        }

        fn chown(&self, path: &Path, spec: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("chown {spec} {}", path.display()))?;
            let attrs = Self::attrs_mut(&mut model, path)?;
            let (owner, group) = spec.split_once(':').unwrap_or((spec, ""));
            if !owner.is_empty() {
                attrs.owner = owner.to_string();
            }
            if !group.is_empty() {
                attrs.group = group.to_string();
            }
            Ok(())
        }

        fn create_dir(&self, path: &Path) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("mkdir {}", path.display()))?;
            if model.files.contains_key(path) {
                return Err(ActionError::permanent(format!("{}: file exists", path.display())));
            }
            model
                .dirs
                .entry(path.to_path_buf())
                .or_insert_with(|| default_attrs(0o755));
            Ok(())
        }

        fn remove_file(&self, path: &Path) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("rm {}", path.display()))?;
            model.files.remove(path);
            Ok(())
        }

        fn remove_dir(&self, path: &Path) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("rmdir {}", path.display()))?;
            model.dirs.remove(path);
            Ok(())
        }
    }

    impl ServiceManager for FakeHost {
        fn enable(&self, unit: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("enable {unit}"))?;
            let state = model
                .services
                .entry(unit.to_string())
                .or_insert((Enablement::Disabled, false));
            if state.0 != Enablement::Fixed {
                state.0 = Enablement::Enabled;
            }
            Ok(())
        }

        fn disable(&self, unit: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("disable {unit}"))?;
            let state = model
                .services
                .entry(unit.to_string())
                .or_insert((Enablement::Disabled, false));
            if state.0 != Enablement::Fixed {
                state.0 = Enablement::Disabled;
            }
            Ok(())
        }

        fn start(&self, unit: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("start {unit}"))?;
            let state = model
                .services
                .entry(unit.to_string())
                .or_insert((Enablement::Disabled, false));
            state.1 = true;
            Ok(())
        }

        fn stop(&self, unit: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("stop {unit}"))?;
            let state = model
                .services
                .entry(unit.to_string())
                .or_insert((Enablement::Disabled, false));
            state.1 = false;
            Ok(())
        }
    }

    impl SysctlManager for FakeHost {
        fn set(&self, key: &str, value: &str) -> Result<(), ActionError> {
            let mut model = self.mutate(format!("sysctl {key}={value}"))?;
            model.sysctls.insert(key.to_string(), value.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::exec::test_helpers::MockExecutor;

    #[test]
    fn run_privileged_prefixes_sudo() {
        let exec = MockExecutor::ok("");
        run_privileged(&exec, Privilege::Sudo, "dnf", &["upgrade", "-y"]).unwrap();
        assert_eq!(exec.calls(), vec!["sudo dnf upgrade -y"]);
    }

    #[test]
    fn run_privileged_as_root_runs_directly() {
        let exec = MockExecutor::ok("");
        run_privileged(&exec, Privilege::Root, "systemctl", &["enable", "sshd"]).unwrap();
        assert_eq!(exec.calls(), vec!["systemctl enable sshd"]);
    }

    #[test]
    fn run_privileged_failure_names_command_without_sudo() {
        let exec = MockExecutor::fail("No match for argument: nosuchpkg");
        let err = run_privileged(&exec, Privilege::Sudo, "dnf", &["install", "-y", "nosuchpkg"])
            .unwrap_err();
        assert_eq!(err.class, FailureClass::Permanent);
        assert!(err.message.starts_with("dnf install -y nosuchpkg failed"));
    }

    #[test]
    fn run_privileged_lock_contention_is_transient() {
        let exec = MockExecutor::fail("Waiting for process with pid 812 to finish.");
        let err = run_privileged(&exec, Privilege::Root, "dnf", &["install", "-y", "git"])
            .unwrap_err();
        assert!(err.is_transient());
    }
}
