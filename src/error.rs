//! Domain-specific error types for the provisioning engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`ValidationError`],
//! [`ApplyError`]) while command handlers at the CLI boundary convert them to
//! [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ProvisionError
//! ├── Validation(ValidationError)   bad manifest, nothing executed
//! ├── Snapshot(SnapshotError)       host state could not be queried
//! └── Apply(ApplyError)             run halted or cancelled
//!
//! ActionError (Transient | Permanent), produced by collaborators
//! ```

use std::fmt;

use thiserror::Error;

use crate::exec::ExecResult;

/// Top-level error type for the provisioning engine.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at CLI command boundaries.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The manifest is invalid.
    #[error("Manifest validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The host state snapshot could not be captured.
    #[error("Host inspection failed: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Applying the plan halted or was cancelled.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

/// Errors raised while loading and validating a manifest.
///
/// Any of these is surfaced before a single action executes.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The manifest (or a `source` file it references) could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path to the file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest is not valid TOML or does not match the manifest schema.
    #[error("invalid manifest {path}: {message}")]
    Parse {
        /// Path to the manifest.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// Two entries share the same identifier.
    #[error("duplicate resource id '{0}'")]
    DuplicateId(String),

    /// The `depends_on` graph contains a cycle.
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// An entry declares a `kind` that the engine does not manage.
    #[error("resource '{id}' has unknown kind '{kind}'")]
    UnknownKind {
        /// Identifier of the offending entry.
        id: String,
        /// The unrecognised kind.
        kind: String,
    },

    /// An entry depends on an identifier that is not in the manifest.
    #[error("resource '{id}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// Identifier of the dependent entry.
        id: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A field is missing, malformed, or not allowed for the entry's kind.
    #[error("resource '{id}': {message}")]
    InvalidField {
        /// Identifier of the offending entry.
        id: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `{{ name }}` placeholder references a variable that is not defined.
    #[error("resource '{id}' references undefined variable '{name}'")]
    UndefinedVariable {
        /// Identifier of the offending entry.
        id: String,
        /// The variable name.
        name: String,
    },

    /// A `--var` argument is not of the form `key=value`.
    #[error("invalid variable '{0}': expected key=value")]
    InvalidVariable(String),
}

/// Whether a failed action may succeed if attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network hiccup, lock contention, interrupted I/O; retried once.
    Transient,
    /// Anything else; halts the run immediately.
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Output fragments that identify a retryable package-manager or systemd failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "curl error",
    "cannot download",
    "failed to download",
    "timed out",
    "temporary failure",
    "could not resolve host",
    "connection refused",
    "connection reset",
    "waiting for process",
    "database is locked",
    "lock held",
    "could not acquire lock",
];

/// A failure reported by a collaborator (package manager, filesystem,
/// service manager, inspector).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    /// Retry classification.
    pub class: FailureClass,
    /// Human-readable cause.
    pub message: String,
}

impl ActionError {
    /// A failure worth retrying.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    /// A failure that halts the run.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Permanent,
            message: message.into(),
        }
    }

    /// Returns `true` if the failure may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class == FailureClass::Transient
    }

    /// Classify an I/O error raised while touching `what`.
    #[must_use]
    pub fn from_io(what: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        let message = format!("{what}: {err}");
        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Self::transient(message)
            }
            _ => Self::permanent(message),
        }
    }

    /// Classify a command that exited non-zero.
    ///
    /// The combined stdout/stderr is scanned for [`TRANSIENT_MARKERS`];
    /// dnf reports mirror and lock problems on either stream.
    #[must_use]
    pub fn from_exec(label: &str, result: &ExecResult) -> Self {
        let output = format!("{}\n{}", result.stdout.trim(), result.stderr.trim());
        let detail = output.trim();
        let message = if detail.is_empty() {
            format!("{label} failed (exit {})", result.code.unwrap_or(-1))
        } else {
            format!("{label} failed (exit {}): {detail}", result.code.unwrap_or(-1))
        };
        let lowered = detail.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::transient(message)
        } else {
            Self::permanent(message)
        }
    }

    /// A command could not be spawned at all (missing binary, bad permissions).
    #[must_use]
    pub fn spawn(label: &str, err: &anyhow::Error) -> Self {
        Self::permanent(format!("{label}: {err:#}"))
    }
}

/// The host state snapshot could not be captured for an entry.
#[derive(Error, Debug)]
#[error("cannot inspect '{entry}': {source}")]
pub struct SnapshotError {
    /// Identifier of the entry being inspected.
    pub entry: String,
    /// Underlying collaborator failure.
    pub source: ActionError,
}

/// Errors that stop plan execution.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// An action failed permanently (or transiently after retries).
    ///
    /// Actions before `index` remain applied; actions after it were never
    /// attempted.
    #[error("action {index}/{total} failed ({entry}: {action}): {source}")]
    Halted {
        /// 1-based position of the failing action in the plan.
        index: usize,
        /// Number of actions in the plan.
        total: usize,
        /// Identifier of the entry the action belongs to.
        entry: String,
        /// Description of the failing action.
        action: String,
        /// Collaborator failure.
        source: ActionError,
    },

    /// Cancellation was requested; the run stopped at an action boundary.
    #[error("cancelled before action {index}/{total}")]
    Cancelled {
        /// 1-based position of the first action that was not attempted.
        index: usize,
        /// Number of actions in the plan.
        total: usize,
    },
}

impl ApplyError {
    /// 1-based index of the action the run stopped at.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Halted { index, .. } | Self::Cancelled { index, .. } => *index,
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;

    fn failed(stdout: &str, stderr: &str) -> ExecResult {
        ExecResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            success: false,
            code: Some(1),
        }
    }

    // -----------------------------------------------------------------------
    // ValidationError
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_id_display() {
        let e = ValidationError::DuplicateId("pkg-git".to_string());
        assert_eq!(e.to_string(), "duplicate resource id 'pkg-git'");
    }

    #[test]
    fn dependency_cycle_display() {
        let e = ValidationError::DependencyCycle("a → b → a".to_string());
        assert_eq!(e.to_string(), "dependency cycle detected: a → b → a");
    }

    #[test]
    fn unknown_kind_display() {
        let e = ValidationError::UnknownKind {
            id: "x".to_string(),
            kind: "flatpak".to_string(),
        };
        assert_eq!(e.to_string(), "resource 'x' has unknown kind 'flatpak'");
    }

    #[test]
    fn io_error_has_source() {
        use std::error::Error as StdError;
        let e = ValidationError::Io {
            path: "/etc/provision.toml".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().contains("/etc/provision.toml"));
    }

    // -----------------------------------------------------------------------
    // ActionError classification
    // -----------------------------------------------------------------------

    #[test]
    fn interrupted_io_is_transient() {
        let err = io::Error::new(io::ErrorKind::Interrupted, "signal");
        assert!(ActionError::from_io("write /etc/hosts", &err).is_transient());
    }

    #[test]
    fn permission_denied_is_permanent() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let e = ActionError::from_io("write /etc/hosts", &err);
        assert_eq!(e.class, FailureClass::Permanent);
        assert!(e.message.contains("/etc/hosts"));
    }

    #[test]
    fn download_failure_is_transient() {
        let result = failed("", "Curl error (28): Timeout was reached");
        assert!(ActionError::from_exec("dnf install", &result).is_transient());
    }

    #[test]
    fn transient_marker_on_stdout_is_detected() {
        let result = failed("Waiting for process with pid 4242 to finish.", "");
        assert!(ActionError::from_exec("dnf install", &result).is_transient());
    }

    #[test]
    fn unknown_package_is_permanent() {
        let result = failed("", "No match for argument: nosuchpkg");
        let e = ActionError::from_exec("dnf install", &result);
        assert!(!e.is_transient());
        assert!(e.message.contains("nosuchpkg"));
        assert!(e.message.contains("exit 1"));
    }

    #[test]
    fn lock_inside_a_package_name_is_permanent() {
        for name in ["blockattack", "clockify", "xlockmore", "flock-utils"] {
            let result = failed("", &format!("No match for argument: {name}"));
            assert!(
                !ActionError::from_exec("dnf install", &result).is_transient(),
                "{name} should not look like lock contention"
            );
        }
    }

    #[test]
    fn lock_contention_is_transient() {
        for output in [
            "Waiting for process with pid 4242 to finish.",
            "rpmdb: database is locked",
            "Error: lock held by process 991",
            "Could not acquire lock on /var/cache/dnf",
        ] {
            let result = failed("", output);
            assert!(
                ActionError::from_exec("dnf install", &result).is_transient(),
                "{output}"
            );
        }
    }

    #[test]
    fn empty_output_still_reports_exit_code() {
        let e = ActionError::from_exec("systemctl enable", &failed("", ""));
        assert_eq!(e.message, "systemctl enable failed (exit 1)");
    }

    // -----------------------------------------------------------------------
    // ApplyError
    // -----------------------------------------------------------------------

    #[test]
    fn halted_display_names_index_and_entry() {
        let e = ApplyError::Halted {
            index: 2,
            total: 3,
            entry: "pkg-b".to_string(),
            action: "install package b".to_string(),
            source: ActionError::permanent("boom"),
        };
        assert_eq!(
            e.to_string(),
            "action 2/3 failed (pkg-b: install package b): boom"
        );
        assert_eq!(e.index(), 2);
    }

    #[test]
    fn cancelled_display() {
        let e = ApplyError::Cancelled { index: 3, total: 5 };
        assert_eq!(e.to_string(), "cancelled before action 3/5");
    }

    #[test]
    fn provision_error_from_validation() {
        let e: ProvisionError = ValidationError::DuplicateId("a".to_string()).into();
        assert!(e.to_string().contains("Manifest validation failed"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<ProvisionError>();
        assert_send_sync::<ValidationError>();
        assert_send_sync::<ActionError>();
        assert_send_sync::<SnapshotError>();
        assert_send_sync::<ApplyError>();
    }

    #[test]
    fn apply_error_converts_to_anyhow() {
        let e = ApplyError::Cancelled { index: 1, total: 1 };
        let anyhow_err: anyhow::Error = e.into();
        assert!(anyhow_err.downcast_ref::<ApplyError>().is_some());
    }
}
