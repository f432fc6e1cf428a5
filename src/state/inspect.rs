//! Read-only queries against the live host.
use std::collections::HashSet;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt as _;
use std::path::Path;
use std::sync::Arc;

use super::{Enablement, Observation, ObservedAttributes};
use crate::config::entry::{self, Entry, Mode, ResourceKind};
use crate::error::ActionError;
use crate::exec::Executor;
use crate::platform::Privilege;

/// Queries current host state without changing it.
pub trait Inspector: Send + Sync + std::fmt::Debug {
    /// Names of every installed package, from one bulk query.
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be queried.
    fn installed_packages(&self) -> Result<HashSet<String>, ActionError>;

    /// Whether a single package is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the package database cannot be queried.
    fn package(&self, name: &str) -> Result<Observation, ActionError>;

    /// Content digest and attributes of the file at `path`.
    ///
    /// A directory at `path` is reported as [`Observation::Directory`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but cannot be read.
    fn file(&self, path: &Path) -> Result<Observation, ActionError>;

    /// Attributes of the directory at `path`.
    ///
    /// A regular file at `path` is reported as [`Observation::File`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path exists but cannot be read.
    fn directory(&self, path: &Path) -> Result<Observation, ActionError>;

    /// Enablement and activity of a systemd unit.
    ///
    /// # Errors
    ///
    /// Returns an error if `systemctl` cannot be run.
    fn service(&self, unit: &str) -> Result<Observation, ActionError>;

    /// Current value of a kernel parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if `sysctl` cannot be run.
    fn sysctl(&self, key: &str) -> Result<Observation, ActionError>;

    /// Inspect whatever `entry` manages.
    ///
    /// # Errors
    ///
    /// Propagates the failure of the kind-specific query.
    fn observe(&self, entry: &Entry) -> Result<Observation, ActionError> {
        match entry.kind {
            ResourceKind::Package => self.package(&entry.target),
            ResourceKind::File => self.file(Path::new(&entry.target)),
            ResourceKind::Directory => self.directory(Path::new(&entry.target)),
            ResourceKind::Service => self.service(&entry.target),
            ResourceKind::Sysctl => self.sysctl(&entry.target),
        }
    }
}

/// [`Inspector`] backed by `rpm`, `stat`, `systemctl`, `sysctl` and `std::fs`.
///
/// Paths are inspected as the calling user first.  Under
/// [`Privilege::Sudo`], a path the user may not stat or read is inspected
/// with `sudo stat` and `sudo sha256sum` instead.
#[derive(Debug, Clone)]
pub struct SystemInspector {
    executor: Arc<dyn Executor>,
    privilege: Privilege,
}

/// File type bits of `st_mode`.
const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// Raw `st_mode` with owner and group names.
#[derive(Debug)]
struct Stat {
    st_mode: u32,
    owner: String,
    group: String,
}

impl SystemInspector {
    /// Create an inspector that runs queries through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            executor,
            privilege,
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<crate::exec::ExecResult, ActionError> {
        let label = format!("{program} {}", args.join(" "));
        self.executor
            .run_unchecked(program, args)
            .map_err(|e| ActionError::spawn(&label, &e))
    }

    fn run_escalated(&self, program: &str, args: &[&str]) -> Result<crate::exec::ExecResult, ActionError> {
        let (program, args) = self.privilege.command(program, args);
        self.run(program, &args)
    }

    fn may_escalate(&self, err: &std::io::Error) -> bool {
        err.kind() == ErrorKind::PermissionDenied && self.privilege == Privilege::Sudo
    }

    /// `stat` resolves uid/gid to names the same way `ls -l` does.
    fn ownership(&self, path: &Path) -> Result<(String, String), ActionError> {
        let path_str = path.to_string_lossy();
        let result = self.run("stat", &["-c", "%U:%G", &path_str])?;
        if !result.success {
            return Err(ActionError::from_exec(&format!("stat {path_str}"), &result));
        }
        let line = result.stdout.trim();
        line.split_once(':')
            .map(|(u, g)| (u.to_string(), g.to_string()))
            .ok_or_else(|| ActionError::permanent(format!("unexpected stat output: {line}")))
    }

    /// `stat` through sudo, for paths the calling user cannot reach.
    ///
    /// `%f` is the raw mode in hex, so the file type does not depend on the
    /// locale's wording.  `None` if the path does not exist.
    fn escalated_stat(&self, path: &Path) -> Result<Option<Stat>, ActionError> {
        let path_str = path.to_string_lossy();
        let result = self.run_escalated("stat", &["-c", "%f:%U:%G", &path_str])?;
        if !result.success {
            if result.stderr.contains("No such file") || result.stdout.contains("No such file") {
                return Ok(None);
            }
            return Err(ActionError::from_exec(&format!("stat {path_str}"), &result));
        }
        let line = result.stdout.trim();
        parse_stat(line)
            .map(Some)
            .ok_or_else(|| ActionError::permanent(format!("unexpected stat output: {line}")))
    }

    fn digest(&self, path: &Path, escalated: bool) -> Result<String, ActionError> {
        if !escalated {
            match std::fs::read(path) {
                Ok(bytes) => return Ok(entry::sha256_hex(&bytes)),
                Err(e) if self.may_escalate(&e) => {}
                Err(e) => return Err(ActionError::from_io(&path.display().to_string(), &e)),
            }
        }
        let path_str = path.to_string_lossy();
        let result = self.run_escalated("sha256sum", &[&path_str])?;
        if !result.success {
            return Err(ActionError::from_exec(&format!("sha256sum {path_str}"), &result));
        }
        result
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ActionError::permanent(format!("sha256sum {path_str}: no output")))
    }

    /// Symlinks are reported as such and never followed.
    fn observe_path(&self, path: &Path) -> Result<Observation, ActionError> {
        let stat = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(Observation::Symlink),
            Ok(meta) => {
                let (owner, group) = self.ownership(path)?;
                return self.classify(
                    path,
                    Stat {
                        st_mode: meta.mode(),
                        owner,
                        group,
                    },
                    false,
                );
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Observation::Absent),
            Err(e) if self.may_escalate(&e) => self.escalated_stat(path)?,
            Err(e) => return Err(ActionError::from_io(&path.display().to_string(), &e)),
        };
        stat.map_or(Ok(Observation::Absent), |stat| self.classify(path, stat, true))
    }

    fn classify(&self, path: &Path, stat: Stat, escalated: bool) -> Result<Observation, ActionError> {
        let attrs = ObservedAttributes {
            mode: Mode(stat.st_mode & 0o7777),
            owner: stat.owner,
            group: stat.group,
        };
        match stat.st_mode & S_IFMT {
            S_IFDIR => Ok(Observation::Directory { attrs }),
            S_IFLNK => Ok(Observation::Symlink),
            S_IFREG => Ok(Observation::File {
                digest: self.digest(path, escalated)?,
                attrs,
            }),
            _ => Err(ActionError::permanent(format!(
                "{}: not a regular file, directory or symlink",
                path.display()
            ))),
        }
    }
}

/// Parse `stat -c %f:%U:%G` output.
fn parse_stat(line: &str) -> Option<Stat> {
    let mut fields = line.splitn(3, ':');
    let st_mode = u32::from_str_radix(fields.next()?, 16).ok()?;
    let owner = fields.next()?.to_string();
    let group = fields.next()?.to_string();
    Some(Stat {
        st_mode,
        owner,
        group,
    })
}

impl Inspector for SystemInspector {
    fn installed_packages(&self) -> Result<HashSet<String>, ActionError> {
        let result = self.run("rpm", &["-qa", "--qf", "%{NAME}\\n"])?;
        if !result.success {
            return Err(ActionError::from_exec("rpm -qa", &result));
        }
        Ok(parse_package_names(&result.stdout))
    }

    fn package(&self, name: &str) -> Result<Observation, ActionError> {
        let result = self.run("rpm", &["-q", "--quiet", name])?;
        Ok(if result.success {
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
        let enabled = self.run("systemctl", &["is-enabled", unit])?;
        let Some(enablement) = parse_is_enabled(&enabled.stdout) else {
            return Ok(Observation::Absent);
        };
        let active = self.run("systemctl", &["is-active", unit])?;
        Ok(Observation::Service {
            enablement,
            active: active.stdout.trim() == "active",
        })
    }

    fn sysctl(&self, key: &str) -> Result<Observation, ActionError> {
        let result = self.run("sysctl", &["-n", key])?;
        Ok(if result.success {
            Observation::Sysctl {
                value: entry::normalize_whitespace(&result.stdout),
            }
        } else {
            Observation::Absent
        })
    }
}

/// Parse `rpm -qa --qf '%{NAME}\n'` output.
///
/// # Examples
///
/// ```
/// use provision_cli::state::inspect::parse_package_names;
///
/// let names = parse_package_names("git\nvim-enhanced\n\n");
/// assert!(names.contains("git"));
/// assert_eq!(names.len(), 2);
/// ```
#[must_use]
pub fn parse_package_names(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Interpret `systemctl is-enabled` output.
///
/// Returns `None` when the unit does not exist (systemctl prints nothing on
/// stdout and an error on stderr).
fn parse_is_enabled(stdout: &str) -> Option<Enablement> {
    match stdout.trim() {
        "" | "not-found" => None,
        "enabled" | "enabled-runtime" | "linked" | "linked-runtime" => Some(Enablement::Enabled),
        "static" | "alias" | "indirect" | "generated" | "transient" => Some(Enablement::Fixed),
        _ => Some(Enablement::Disabled),
    }
}
