//! Structured logger with dry-run awareness and summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::subscriber::{DRY_RUN_TARGET, STAGE_TARGET};
use super::types::{ActionRecord, ActionStatus, Log};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// The `record_action` method is **not** included because its signature
/// differs from the `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Per-status tallies for the run summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Actions that mutated the host.
    pub applied: usize,
    /// Actions found already satisfied at execution time.
    pub satisfied: usize,
    /// Actions only printed.
    pub dry_run: usize,
    /// Actions that failed.
    pub failed: usize,
    /// Actions never reached.
    pub not_attempted: usize,
}

impl Tally {
    fn add(&mut self, status: ActionStatus) {
        match status {
            ActionStatus::Applied => self.applied += 1,
            ActionStatus::AlreadySatisfied => self.satisfied += 1,
            ActionStatus::DryRun => self.dry_run += 1,
            ActionStatus::Failed => self.failed += 1,
            ActionStatus::NotAttempted => self.not_attempted += 1,
        }
    }

    /// Total number of actions counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.applied + self.satisfied + self.dry_run + self.failed + self.not_attempted
    }
}

/// Structured logger with dry-run awareness and summary collection.
///
/// All messages are always written to a persistent log file at
/// `$XDG_CACHE_HOME/provision/<command>.log` (default
/// `~/.cache/provision/<command>.log`) with timestamps and ANSI codes
/// stripped, regardless of the verbose flag.
#[derive(Debug)]
pub struct Logger {
    actions: Mutex<Vec<ActionRecord>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary.  The log file
    /// itself is created by [`init_subscriber`](super::subscriber::init_subscriber).
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded actions.
    #[must_use]
    pub fn records(&self) -> Vec<ActionRecord> {
        self.actions.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    /// Record an action result for the summary.
    pub fn record_action(&self, label: &str, status: ActionStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.actions.lock() {
            guard.push(ActionRecord {
                label: label.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count recorded actions by status.
    #[must_use]
    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        if let Ok(guard) = self.actions.lock() {
            for record in guard.iter() {
                tally.add(record.status);
            }
        }
        tally
    }

    /// Print the summary of all recorded actions.
    pub fn print_summary(&self) {
        let records = self.records();
        if records.is_empty() {
            return;
        }

        self.stage("Summary");

        for record in &records {
            let (icon, color) = match record.status {
                ActionStatus::Applied => ("✓", "\x1b[32m"),
                ActionStatus::AlreadySatisfied => ("·", "\x1b[2m"),
                ActionStatus::DryRun => ("~", "\x1b[37m"),
                ActionStatus::Failed => ("✗", "\x1b[31m"),
                ActionStatus::NotAttempted => ("○", "\x1b[33m"),
            };

            let suffix = record
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", record.label));
        }

        let t = self.tally();
        self.info(&format!(
            "{} actions: \x1b[32m{} applied\x1b[0m, \x1b[2m{} already satisfied\x1b[0m, \x1b[37m{} dry-run\x1b[0m, \x1b[31m{} failed\x1b[0m, \x1b[33m{} not attempted\x1b[0m",
            t.total(),
            t.applied,
            t.satisfied,
            t.dry_run,
            t.failed,
            t.not_attempted
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_action(&self, label: &str, status: ActionStatus, message: Option<&str>) {
        self.record_action(label, status, message);
    }
}
