//! File and directory mutations.
use std::io::{ErrorKind, Write as _};
use std::os::unix::fs::PermissionsExt as _;
use std::path::Path;
use std::sync::Arc;

use super::helpers::fs as fs_helpers;
use super::run_privileged;
use crate::config::entry::Mode;
use crate::error::ActionError;
use crate::exec::{ExecResult, Executor};
use crate::platform::Privilege;

/// Writes and removes files and directories, and sets their attributes.
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Atomically replace `path` with `bytes`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ActionError>;

    /// Set permission bits.
    ///
    /// # Errors
    ///
    /// Returns an error if the permissions cannot be changed.
    fn chmod(&self, path: &Path, mode: Mode) -> Result<(), ActionError>;

    /// Change ownership; `spec` uses `chown` syntax (`user:group`, `user`
    /// or `:group`).
    ///
    /// # Errors
    ///
    /// Returns an error if `chown` fails (unknown user, missing path).
    fn chown(&self, path: &Path, spec: &str) -> Result<(), ActionError>;

    /// Create a directory and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    fn create_dir(&self, path: &Path) -> Result<(), ActionError>;

    /// Remove a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    fn remove_file(&self, path: &Path) -> Result<(), ActionError>;

    /// Remove an empty directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is not empty or cannot be removed.
    fn remove_dir(&self, path: &Path) -> Result<(), ActionError>;
}

/// [`FileSystem`] for the live host.
///
/// As root every mutation goes through `std::fs`.  Under [`Privilege::Sudo`]
/// the calling user cannot touch system paths, so mutations run as
/// `sudo install`/`mv`/`chmod`/`mkdir`/`rm`/`rmdir` instead; new content is
/// staged in a temporary file the user owns and installed from there.
/// `chown` and `restorecon` always run as commands.
#[derive(Debug, Clone)]
pub struct SystemFs {
    executor: Arc<dyn Executor>,
    privilege: Privilege,
}

impl SystemFs {
    /// Create a filesystem collaborator.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, privilege: Privilege) -> Self {
        Self {
            executor,
            privilege,
        }
    }

    /// Read `path` as text, `None` if it does not exist.
    ///
    /// Falls back to `sudo cat` when the calling user may not read it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_to_string(&self, path: &Path) -> Result<Option<String>, ActionError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::PermissionDenied && self.privilege == Privilege::Sudo => {
                let path_str = path.to_string_lossy();
                self.privileged("cat", &[&path_str]).map(|r| Some(r.stdout))
            }
            Err(e) => Err(io_error(path)(e)),
        }
    }

    fn privileged(&self, program: &str, args: &[&str]) -> Result<ExecResult, ActionError> {
        run_privileged(&*self.executor, self.privilege, program, args)
    }

    /// Reset the SELinux context of a freshly written path.
    ///
    /// Best effort: hosts without SELinux tooling, or paths the policy does
    /// not label, are left alone.
    fn restore_context(&self, path: &Path) {
        if !self.executor.which("restorecon") {
            return;
        }
        let path_str = path.to_string_lossy();
        if let Err(e) = self.privileged("restorecon", &[&path_str]) {
            tracing::debug!("restorecon {path_str}: {e}");
        }
    }

    /// Stage `bytes` in a user-owned temporary file, install it next to
    /// `path` as root and rename it into place.
    fn write_privileged(&self, path: &Path, bytes: &[u8]) -> Result<(), ActionError> {
        let mut staged = tempfile::NamedTempFile::new()
            .map_err(|e| ActionError::from_io("temporary file", &e))?;
        staged.write_all(bytes).map_err(io_error(path))?;

        // An existing target keeps its permission bits.
        let mode = std::fs::metadata(path)
            .map_or(Mode(0o644), |m| Mode(m.permissions().mode() & 0o7777))
            .to_string();
        let tmp = fs_helpers::staging_path(path);
        let (staged_str, tmp_str, path_str) = (
            staged.path().to_string_lossy(),
            tmp.to_string_lossy(),
            path.to_string_lossy(),
        );

        self.privileged("install", &["-D", "-m", &mode, &staged_str, &tmp_str])?;
        if let Err(e) = self.privileged("mv", &["-f", "-T", &tmp_str, &path_str]) {
            let _ = self.privileged("rm", &["-f", &tmp_str]);
            return Err(e);
        }
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ActionError + '_ {
    move |e| ActionError::from_io(&path.display().to_string(), &e)
}

impl FileSystem for SystemFs {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), ActionError> {
        match self.privilege {
            Privilege::Root => fs_helpers::write_atomic(path, bytes).map_err(io_error(path))?,
            Privilege::Sudo => self.write_privileged(path, bytes)?,
        }
        self.restore_context(path);
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: Mode) -> Result<(), ActionError> {
        match self.privilege {
            Privilege::Root => std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode.0))
                .map_err(io_error(path)),
            Privilege::Sudo => {
                let path_str = path.to_string_lossy();
                self.privileged("chmod", &[&mode.to_string(), &path_str])
                    .map(|_| ())
            }
        }
    }

    fn chown(&self, path: &Path, spec: &str) -> Result<(), ActionError> {
        let path_str = path.to_string_lossy();
        self.privileged("chown", &[spec, &path_str]).map(|_| ())
    }

    fn create_dir(&self, path: &Path) -> Result<(), ActionError> {
        match self.privilege {
            Privilege::Root => std::fs::create_dir_all(path).map_err(io_error(path))?,
            Privilege::Sudo => {
                let path_str = path.to_string_lossy();
                self.privileged("mkdir", &["-p", &path_str])?;
            }
        }
        self.restore_context(path);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ActionError> {
        match self.privilege {
            Privilege::Root => std::fs::remove_file(path).map_err(io_error(path)),
            Privilege::Sudo => {
                let path_str = path.to_string_lossy();
                self.privileged("rm", &["-f", &path_str]).map(|_| ())
            }
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<(), ActionError> {
        match self.privilege {
            Privilege::Root => std::fs::remove_dir(path).map_err(io_error(path)),
            Privilege::Sudo => {
                let path_str = path.to_string_lossy();
                self.privileged("rmdir", &[&path_str]).map(|_| ())
            }
        }
    }
}
