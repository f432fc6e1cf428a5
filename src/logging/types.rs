//! Core logging types: action records, status, and the [`Log`] trait.

/// Action result for summary reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Rendered action, e.g. `"[sshd] enable and start sshd.service"`.
    pub label: String,
    /// Final status of the action.
    pub status: ActionStatus,
    /// Optional detail message (e.g., error description).
    pub message: Option<String>,
}

/// Status of an action once the run is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// The action mutated the host.
    Applied,
    /// A re-check just before execution found nothing to do.
    AlreadySatisfied,
    /// Dry run; the action was only printed.
    DryRun,
    /// The action failed and halted the run.
    Failed,
    /// The run stopped before reaching the action.
    NotAttempted,
}

/// Abstraction over logging backends.
///
/// The applier records per-action results through this trait so tests can
/// inspect them without touching the console.
pub trait Log: Send + Sync + std::fmt::Debug {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record an action result for the summary.
    fn record_action(&self, label: &str, status: ActionStatus, message: Option<&str>);
}
