//! Plan execution.
//!
//! The [`Applier`] walks an [`ActionPlan`] strictly in order.  Before each
//! action it checks the [`CancelFlag`], re-inspects the entry and re-diffs it
//! against the manifest, so work that became unnecessary since planning is
//! skipped.  Transient failures are retried per [`RetryPolicy`]; the first
//! unrecoverable failure halts the run and leaves earlier actions in place.
pub mod cancel;
pub mod retry;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Manifest;
use crate::config::entry::Attributes;
use crate::error::{ActionError, ApplyError};
use crate::exec::Executor;
use crate::logging::{ActionStatus, Log};
use crate::plan::{Action, ActionKind, ActionPlan, diff_entry};
use crate::platform::Privilege;
use crate::resources::{
    Dnf, FileSystem, PackageManager, ServiceManager, Sysctl, SysctlManager, SystemFs, Systemctl,
};
use crate::state::{Inspector, SystemInspector};
pub use cancel::CancelFlag;
pub use retry::{RetryCallback, RetryPolicy, with_retry};

/// The host-facing services an [`Applier`] drives.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Re-checks entries before acting on them.
    pub inspector: Arc<dyn Inspector>,
    /// Installs and removes packages.
    pub packages: Arc<dyn PackageManager>,
    /// Writes files and directories.
    pub fs: Arc<dyn FileSystem>,
    /// Controls systemd units.
    pub services: Arc<dyn ServiceManager>,
    /// Sets kernel parameters.
    pub sysctl: Arc<dyn SysctlManager>,
}

impl Collaborators {
    /// Production collaborators sharing one executor.
    #[must_use]
    pub fn system(executor: &Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            inspector: Arc::new(SystemInspector::new(Arc::clone(executor), privilege)),
            packages: Arc::new(Dnf::new(Arc::clone(executor), privilege)),
            fs: Arc::new(SystemFs::new(Arc::clone(executor), privilege)),
            services: Arc::new(Systemctl::new(Arc::clone(executor), privilege)),
            sysctl: Arc::new(Sysctl::new(Arc::clone(executor), privilege)),
        }
    }
}

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The host was mutated.
    Applied {
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The re-check found the entry already converged; nothing ran.
    AlreadySatisfied,
    /// The action failed and halted the run.
    Failed {
        /// Attempts used.
        attempts: u32,
        /// Failure of the last attempt.
        error: ActionError,
    },
    /// The run stopped before this action.
    NotAttempted,
}

impl Outcome {
    const fn status(&self) -> ActionStatus {
        match self {
            Self::Applied { .. } => ActionStatus::Applied,
            Self::AlreadySatisfied => ActionStatus::AlreadySatisfied,
            Self::Failed { .. } => ActionStatus::Failed,
            Self::NotAttempted => ActionStatus::NotAttempted,
        }
    }
}

/// One action and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReport {
    /// The planned action.
    pub action: Action,
    /// What happened to it.
    pub outcome: Outcome,
}

/// Result of executing a plan.
///
/// Holds one [`ActionReport`] per planned action, in plan order, whether or
/// not the run completed.
#[derive(Debug)]
pub struct ApplyReport {
    /// Per-action outcomes.
    pub actions: Vec<ActionReport>,
    /// Why the run stopped early, if it did.
    pub error: Option<ApplyError>,
}

impl ApplyReport {
    /// Returns `true` if every action was applied or already satisfied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Outcomes in plan order.
    #[must_use]
    pub fn outcomes(&self) -> Vec<&Outcome> {
        self.actions.iter().map(|r| &r.outcome).collect()
    }

    /// Number of actions that mutated the host.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.actions
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Applied { .. }))
            .count()
    }

    /// Convert into `Err` if the run halted or was cancelled.
    ///
    /// # Errors
    ///
    /// Returns the [`ApplyError`] that stopped the run.
    pub fn into_result(self) -> Result<Vec<ActionReport>, ApplyError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.actions),
        }
    }
}

/// Logs retries through the run's [`Log`].
struct LogRetry<'a> {
    log: &'a dyn Log,
    action: &'a Action,
}

impl RetryCallback for LogRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ActionError, delay: Duration) {
        self.log.warn(&format!(
            "{} failed (attempt {attempt}/{max_attempts}): {error}; retrying in {}s",
            self.action,
            delay.as_secs()
        ));
    }
}

/// Result of one attempt at an action.
enum Step {
    Applied,
    Satisfied,
}

/// Executes action plans against the host.
#[derive(Debug)]
pub struct Applier {
    collaborators: Collaborators,
    policy: RetryPolicy,
    cancel: CancelFlag,
    log: Arc<dyn Log>,
}

impl Applier {
    /// Create an applier with the default retry policy and its own cancel
    /// flag.
    #[must_use]
    pub fn new(collaborators: Collaborators, log: Arc<dyn Log>) -> Self {
        Self {
            collaborators,
            policy: RetryPolicy::default(),
            cancel: CancelFlag::new(),
            log,
        }
    }

    /// Use `policy` for transient failures.
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Observe `cancel` between actions.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute `plan`, which must have been computed from `manifest`.
    ///
    /// Never panics and never stops mid-action; the returned report says
    /// how far the run got.
    pub fn apply(&self, manifest: &Manifest, plan: &ActionPlan) -> ApplyReport {
        let total = plan.len();
        let mut actions = Vec::with_capacity(total);
        let mut error = None;

        for (i, action) in plan.actions().iter().enumerate() {
            let index = i + 1;
            let outcome = if error.is_some() {
                Outcome::NotAttempted
            } else if self.cancel.is_cancelled() {
                self.log
                    .warn(&format!("cancelled before action {index}/{total}"));
                error = Some(ApplyError::Cancelled { index, total });
                Outcome::NotAttempted
            } else {
                self.log.info(&format!("[{index}/{total}] {action}"));
                let outcome = self.execute(manifest, action);
                if let Outcome::Failed { error: source, .. } = &outcome {
                    self.log.error(&format!(
                        "action {index}/{total} failed ({}): {source}",
                        action.entry
                    ));
                    error = Some(ApplyError::Halted {
                        index,
                        total,
                        entry: action.entry.clone(),
                        action: action.kind.to_string(),
                        source: source.clone(),
                    });
                }
                outcome
            };

            let message = match &outcome {
                Outcome::Failed { error, .. } => Some(error.message.as_str()),
                _ => None,
            };
            self.log
                .record_action(&action.to_string(), outcome.status(), message);
            actions.push(ActionReport {
                action: action.clone(),
                outcome,
            });
        }

        ApplyReport { actions, error }
    }

    /// Run one action with re-check and retry.
    fn execute(&self, manifest: &Manifest, action: &Action) -> Outcome {
        let mut attempts = 0;
        let callback = LogRetry {
            log: &*self.log,
            action,
        };
        let result = with_retry(&self.policy, Some(&callback), || {
            attempts += 1;
            let Some(kind) = self.recheck(manifest, action)? else {
                return Ok(Step::Satisfied);
            };
            self.perform(&kind)?;
            Ok(Step::Applied)
        });

        match result {
            Ok(Step::Satisfied) if attempts == 1 => {
                self.log
                    .debug(&format!("{}: already satisfied", action.entry));
                Outcome::AlreadySatisfied
            }
            Ok(_) => Outcome::Applied { attempts },
            Err(error) => Outcome::Failed { attempts, error },
        }
    }

    /// Re-inspect the entry behind `action` and return what still needs
    /// doing, if anything.
    ///
    /// An action whose entry is not in the manifest is performed as planned.
    fn recheck(&self, manifest: &Manifest, action: &Action) -> Result<Option<ActionKind>, ActionError> {
        let Some(entry) = manifest.get(&action.entry) else {
            return Ok(Some(action.kind.clone()));
        };
        let observed = self.collaborators.inspector.observe(entry).map_err(|e| {
            ActionError::permanent(format!("cannot re-inspect '{}': {}", entry.id, e.message))
        })?;
        Ok(diff_entry(entry, Some(&observed)))
    }

    fn perform(&self, kind: &ActionKind) -> Result<(), ActionError> {
        let c = &self.collaborators;
        match kind {
            ActionKind::Install { package, source } => {
                let arg = source.as_ref().unwrap_or(package).clone();
                c.packages.install(&[arg])
            }
            ActionKind::Remove { package } => c.packages.remove(&[package.clone()]),
            ActionKind::WriteFile {
                path,
                content,
                attrs,
            } => {
                c.fs.write(path, &content.bytes)?;
                self.set_attributes(path, attrs)
            }
            ActionKind::SetAttributes { path, attrs } => self.set_attributes(path, attrs),
            ActionKind::DeleteFile { path } => c.fs.remove_file(path),
            ActionKind::CreateDirectory { path, attrs } => {
                c.fs.create_dir(path)?;
                self.set_attributes(path, attrs)
            }
            ActionKind::RemoveDirectory { path } => c.fs.remove_dir(path),
            ActionKind::EnableService { unit, now } => {
                c.services.enable(unit)?;
                if *now {
                    c.services.start(unit)?;
                }
                Ok(())
            }
            ActionKind::DisableService { unit, now } => {
                if *now {
                    c.services.stop(unit)?;
                }
                c.services.disable(unit)
            }
            ActionKind::SetSysctl { key, value } => c.sysctl.set(key, value),
        }
    }

    fn set_attributes(&self, path: &Path, attrs: &Attributes) -> Result<(), ActionError> {
        if let Some(mode) = attrs.mode {
            self.collaborators.fs.chmod(path, mode)?;
        }
        if let Some(spec) = attrs.chown_spec() {
            self.collaborators.fs.chown(path, &spec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::unreachable
)]
mod tests {
    use super::*;
    use crate::config::entry::{DesiredState, Entry, FileContent, Mode};
    use crate::logging::ActionRecord;
    use crate::plan;
    use crate::resources::fs::MockFileSystem;
    use crate::resources::package::MockPackageManager;
    use crate::resources::test_helpers::FakeHost;
    use crate::state::HostState;
    use std::sync::Mutex;

    /// Records everything logged, for assertions.
    #[derive(Debug, Default)]
    struct RecordingLog {
        lines: Mutex<Vec<String>>,
        records: Mutex<Vec<ActionRecord>>,
    }

    impl RecordingLog {
        fn push(&self, level: &str, msg: &str) {
            self.lines.lock().unwrap().push(format!("{level}: {msg}"));
        }

        fn statuses(&self) -> Vec<ActionStatus> {
            self.records.lock().unwrap().iter().map(|r| r.status).collect()
        }

        fn warnings(&self) -> Vec<String> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.starts_with("warn: "))
                .cloned()
                .collect()
        }
    }

    impl Log for RecordingLog {
        fn stage(&self, msg: &str) {
            self.push("stage", msg);
        }
        fn info(&self, msg: &str) {
            self.push("info", msg);
        }
        fn debug(&self, msg: &str) {
            self.push("debug", msg);
        }
        fn warn(&self, msg: &str) {
            self.push("warn", msg);
        }
        fn error(&self, msg: &str) {
            self.push("error", msg);
        }
        fn dry_run(&self, msg: &str) {
            self.push("dry_run", msg);
        }
        fn record_action(&self, label: &str, status: ActionStatus, message: Option<&str>) {
            self.records.lock().unwrap().push(ActionRecord {
                label: label.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    fn fake_collaborators(host: &Arc<FakeHost>) -> Collaborators {
        Collaborators {
            inspector: Arc::clone(host) as Arc<dyn Inspector>,
            packages: Arc::clone(host) as Arc<dyn PackageManager>,
            fs: Arc::clone(host) as Arc<dyn FileSystem>,
            services: Arc::clone(host) as Arc<dyn ServiceManager>,
            sysctl: Arc::clone(host) as Arc<dyn SysctlManager>,
        }
    }

    fn applier(collaborators: Collaborators) -> (Applier, Arc<RecordingLog>) {
        let log = Arc::new(RecordingLog::default());
        let applier = Applier::new(collaborators, Arc::clone(&log) as Arc<dyn Log>)
            .with_policy(RetryPolicy::immediate(1));
        (applier, log)
    }

    fn package(id: &str) -> Entry {
        Entry::new(id, id, DesiredState::PackagePresent { source: None })
    }

    fn replan(manifest: &Manifest, host: &FakeHost) -> ActionPlan {
        let state = HostState::capture(manifest, host).unwrap();
        plan::plan(manifest, &state)
    }

    fn mixed_manifest() -> Manifest {
        Manifest::new(vec![
            package("openssh-server"),
            Entry::new(
                "sshd-config",
                "/etc/ssh/sshd_config.d/10-provision.conf",
                DesiredState::FilePresent {
                    content: FileContent::inline("PermitRootLogin no\n"),
                    attrs: Attributes {
                        mode: Some(Mode(0o600)),
                        owner: None,
                        group: Some("wheel".to_string()),
                    },
                },
            )
            .depends_on(["openssh-server"]),
            Entry::new(
                "sshd",
                "sshd.service",
                DesiredState::ServiceEnabled { now: true },
            )
            .depends_on(["sshd-config"]),
            Entry::new(
                "srv",
                "/srv/data",
                DesiredState::DirectoryPresent {
                    attrs: Attributes {
                        mode: Some(Mode(0o750)),
                        ..Attributes::default()
                    },
                },
            ),
            Entry::new(
                "swappiness",
                "vm.swappiness",
                DesiredState::SysctlValue {
                    value: "10".to_string(),
                },
            ),
            Entry::new("abrt", "abrt", DesiredState::PackageAbsent),
            Entry::new("cups", "cups.service", DesiredState::ServiceDisabled { now: true }),
        ])
        .unwrap()
    }

    #[test]
    fn install_then_nothing_to_do() {
        let manifest = Manifest::new(vec![package("pkgA")]).unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);
        assert_eq!(plan.len(), 1);

        let (applier, log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert!(report.is_success());
        assert_eq!(report.outcomes(), vec![&Outcome::Applied { attempts: 1 }]);
        assert_eq!(log.statuses(), vec![ActionStatus::Applied]);
        assert!(host.has_package("pkgA"));
        assert!(replan(&manifest, &host).is_empty());
    }

    #[test]
    fn applying_then_replanning_is_empty() {
        let manifest = mixed_manifest();
        let host = Arc::new(
            FakeHost::new()
                .with_package("abrt")
                .with_service("cups.service", true, true)
                .with_service("sshd.service", false, false)
                .with_sysctl("vm.swappiness", "60"),
        );
        let plan = replan(&manifest, &host);
        assert_eq!(plan.len(), 7);

        let (applier, _log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.applied(), 7);
        assert!(replan(&manifest, &host).is_empty());
        assert_eq!(
            host.file_content("/etc/ssh/sshd_config.d/10-provision.conf"),
            Some(b"PermitRootLogin no\n".to_vec())
        );
        assert!(!host.has_package("abrt"));
    }

    #[test]
    fn service_actions_run_in_order() {
        let manifest = mixed_manifest();
        let host = Arc::new(
            FakeHost::new()
                .with_package("openssh-server")
                .with_file("/etc/ssh/sshd_config.d/10-provision.conf", "PermitRootLogin no\n", 0o600)
                .with_dir("/srv/data", 0o750)
                .with_sysctl("vm.swappiness", "10")
                .with_service("sshd.service", false, false)
                .with_service("cups.service", true, true),
        );
        let plan = replan(&manifest, &host);
        let (applier, _log) = applier(fake_collaborators(&host));
        applier.apply(&manifest, &plan);

        assert_eq!(
            host.mutations(),
            vec![
                "chmod 600 /etc/ssh/sshd_config.d/10-provision.conf",
                "chown :wheel /etc/ssh/sshd_config.d/10-provision.conf",
                "enable sshd.service",
                "start sshd.service",
                "stop cups.service",
                "disable cups.service",
            ]
        );
    }

    #[test]
    fn permanent_failure_halts_at_second_of_three() {
        let manifest = Manifest::new(vec![package("a"), package("b"), package("c")]).unwrap();
        let host = Arc::new(
            FakeHost::new().failing("install b", ActionError::permanent("No match for argument: b")),
        );
        let plan = replan(&manifest, &host);

        let (applier, log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert_eq!(
            report.outcomes(),
            vec![
                &Outcome::Applied { attempts: 1 },
                &Outcome::Failed {
                    attempts: 1,
                    error: ActionError::permanent("No match for argument: b"),
                },
                &Outcome::NotAttempted,
            ]
        );
        assert_eq!(host.mutations(), vec!["install a", "install b"]);
        assert!(host.has_package("a"));
        assert!(!host.has_package("c"));
        assert_eq!(
            log.statuses(),
            vec![
                ActionStatus::Applied,
                ActionStatus::Failed,
                ActionStatus::NotAttempted
            ]
        );
        match report.error {
            Some(ApplyError::Halted {
                index, total, entry, ..
            }) => {
                assert_eq!((index, total, entry.as_str()), (2, 3, "b"));
            }
            other => unreachable!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn transient_failure_is_retried_once_and_succeeds() {
        let manifest = Manifest::new(vec![package("git")]).unwrap();
        let host = Arc::new(
            FakeHost::new().failing("install git", ActionError::transient("Curl error (6)")),
        );
        let plan = replan(&manifest, &host);

        let (applier, log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert!(report.is_success());
        assert_eq!(report.outcomes(), vec![&Outcome::Applied { attempts: 2 }]);
        assert_eq!(host.mutations(), vec!["install git", "install git"]);
        assert_eq!(log.warnings().len(), 1);
        assert!(log.warnings()[0].contains("attempt 1/2"));
    }

    #[test]
    fn transient_failure_halts_after_retries() {
        let manifest = Manifest::new(vec![package("git"), package("vim")]).unwrap();
        let host = Arc::new(
            FakeHost::new()
                .failing("install git", ActionError::transient("Curl error (6)"))
                .failing("install git", ActionError::transient("Curl error (6)")),
        );
        let plan = replan(&manifest, &host);

        let (applier, _log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert_eq!(
            report.outcomes(),
            vec![
                &Outcome::Failed {
                    attempts: 2,
                    error: ActionError::transient("Curl error (6)"),
                },
                &Outcome::NotAttempted,
            ]
        );
        assert_eq!(report.error.as_ref().map(ApplyError::index), Some(1));
        assert!(!host.has_package("vim"));
    }

    #[test]
    fn cancellation_before_first_action() {
        let manifest = Manifest::new(vec![package("a"), package("b")]).unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);
        let flag = CancelFlag::new();
        flag.cancel();

        let (applier, _log) = applier(fake_collaborators(&host));
        let report = applier.with_cancel_flag(flag).apply(&manifest, &plan);

        assert!(host.mutations().is_empty());
        assert_eq!(
            report.outcomes(),
            vec![&Outcome::NotAttempted, &Outcome::NotAttempted]
        );
        assert!(matches!(
            report.error,
            Some(ApplyError::Cancelled { index: 1, total: 2 })
        ));
    }

    #[test]
    fn cancellation_is_observed_between_actions() {
        let manifest = Manifest::new(vec![package("a"), package("b")]).unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);
        let flag = CancelFlag::new();

        let mut packages = MockPackageManager::new();
        let in_flight = flag.clone();
        packages
            .expect_install()
            .times(1)
            .returning(move |_| {
                in_flight.cancel();
                Ok(())
            });
        let collaborators = Collaborators {
            packages: Arc::new(packages),
            ..fake_collaborators(&host)
        };

        let (applier, _log) = applier(collaborators);
        let report = applier.with_cancel_flag(flag).apply(&manifest, &plan);

        assert_eq!(
            report.outcomes(),
            vec![&Outcome::Applied { attempts: 1 }, &Outcome::NotAttempted]
        );
        assert!(matches!(
            report.error,
            Some(ApplyError::Cancelled { index: 2, total: 2 })
        ));
    }

    #[test]
    fn converged_since_planning_is_already_satisfied() {
        let manifest = Manifest::new(vec![package("git")]).unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);
        PackageManager::install(&*host, &["git".to_string()]).unwrap();

        let (applier, log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        assert!(report.is_success());
        assert_eq!(report.outcomes(), vec![&Outcome::AlreadySatisfied]);
        assert_eq!(host.mutations(), vec!["install git"]);
        assert_eq!(log.statuses(), vec![ActionStatus::AlreadySatisfied]);
    }

    #[test]
    fn recheck_failure_halts_permanently() {
        let manifest = Manifest::new(vec![package("git")]).unwrap();
        let host = Arc::new(FakeHost::new().failing_inspection("git"));
        let plan = ActionPlan::new(vec![Action {
            entry: "git".to_string(),
            kind: ActionKind::Install {
                package: "git".to_string(),
                source: None,
            },
        }]);

        let (applier, _log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &plan);

        match &report.outcomes()[..] {
            [Outcome::Failed { attempts: 1, error }] => {
                assert!(!error.is_transient());
                assert!(error.message.contains("cannot re-inspect 'git'"));
            }
            other => unreachable!("unexpected outcomes {other:?}"),
        }
        assert!(host.mutations().is_empty());
    }

    #[test]
    fn install_from_source_passes_url() {
        let manifest = Manifest::new(vec![Entry::new(
            "rpmfusion",
            "rpmfusion-free-release",
            DesiredState::PackagePresent {
                source: Some("https://example.org/rpmfusion-free-release.noarch.rpm".to_string()),
            },
        )])
        .unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);

        let mut packages = MockPackageManager::new();
        packages
            .expect_install()
            .withf(|names| names == ["https://example.org/rpmfusion-free-release.noarch.rpm"])
            .times(1)
            .returning(|_| Ok(()));
        let collaborators = Collaborators {
            packages: Arc::new(packages),
            ..fake_collaborators(&host)
        };

        let (applier, _log) = applier(collaborators);
        assert!(applier.apply(&manifest, &plan).is_success());
    }

    #[test]
    fn file_write_then_attributes_in_sequence() {
        let manifest = Manifest::new(vec![Entry::new(
            "motd",
            "/etc/motd",
            DesiredState::FilePresent {
                content: FileContent::inline("welcome\n"),
                attrs: Attributes {
                    mode: Some(Mode(0o644)),
                    owner: Some("root".to_string()),
                    group: Some("root".to_string()),
                },
            },
        )])
        .unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);

        let mut seq = mockall::Sequence::new();
        let mut fs = MockFileSystem::new();
        fs.expect_write()
            .withf(|path, bytes| path == Path::new("/etc/motd") && bytes == b"welcome\n")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        fs.expect_chmod()
            .withf(|_, mode| *mode == Mode(0o644))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        fs.expect_chown()
            .withf(|_, spec| spec == "root:root")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let collaborators = Collaborators {
            fs: Arc::new(fs),
            ..fake_collaborators(&host)
        };

        let (applier, _log) = applier(collaborators);
        assert!(applier.apply(&manifest, &plan).is_success());
    }

    #[test]
    fn source_file_writes_bytes_loaded_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("motd");
        std::fs::write(&src, "from source\n").unwrap();
        let manifest = Manifest::new(vec![Entry::new(
            "motd",
            "/etc/motd",
            DesiredState::FilePresent {
                content: FileContent::source(src.clone(), b"from source\n".to_vec()),
                attrs: Attributes::default(),
            },
        )])
        .unwrap();
        let host = Arc::new(FakeHost::new());
        let plan = replan(&manifest, &host);
        std::fs::write(&src, "edited after planning\n").unwrap();

        let (applier, _log) = applier(fake_collaborators(&host));
        assert!(applier.apply(&manifest, &plan).is_success());

        assert_eq!(host.mutations(), vec!["write /etc/motd"]);
        assert_eq!(
            host.file_content("/etc/motd"),
            Some(b"from source\n".to_vec())
        );
        assert!(replan(&manifest, &host).is_empty());
    }

    #[test]
    fn static_unit_converges_after_stop() {
        let manifest = Manifest::new(vec![
            Entry::new(
                "journald",
                "systemd-journald.service",
                DesiredState::ServiceDisabled { now: true },
            ),
            Entry::new(
                "tmp-mount",
                "tmp.mount",
                DesiredState::ServiceDisabled { now: false },
            ),
        ])
        .unwrap();
        let host = Arc::new(
            FakeHost::new()
                .with_static_service("systemd-journald.service", true)
                .with_static_service("tmp.mount", true),
        );
        let plan = replan(&manifest, &host);
        assert_eq!(plan.len(), 1);

        let (applier, _log) = applier(fake_collaborators(&host));
        assert!(applier.apply(&manifest, &plan).is_success());

        assert_eq!(
            host.mutations(),
            vec![
                "stop systemd-journald.service",
                "disable systemd-journald.service"
            ]
        );
        assert!(replan(&manifest, &host).is_empty());
    }

    #[test]
    fn empty_plan_is_success() {
        let manifest = Manifest::new(vec![]).unwrap();
        let host = Arc::new(FakeHost::new());
        let (applier, log) = applier(fake_collaborators(&host));
        let report = applier.apply(&manifest, &ActionPlan::default());
        assert!(report.is_success());
        assert!(report.actions.is_empty());
        assert!(log.statuses().is_empty());
    }

    #[test]
    fn into_result_surfaces_halt() {
        let manifest = Manifest::new(vec![package("a")]).unwrap();
        let host = Arc::new(FakeHost::new().failing("install a", ActionError::permanent("boom")));
        let plan = replan(&manifest, &host);
        let (applier, _log) = applier(fake_collaborators(&host));
        let err = applier.apply(&manifest, &plan).into_result().unwrap_err();
        assert_eq!(err.to_string(), "action 1/1 failed (a: install a): boom");
    }
}
