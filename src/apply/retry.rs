//! Bounded retry for transient action failures.
use std::thread;
use std::time::Duration;

use crate::error::ActionError;

/// How often and how patiently a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Pause before each retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without pausing.
    #[must_use]
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay: Duration::ZERO,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::immediate(0)
    }

    /// Total number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Notified before each retry.
pub trait RetryCallback {
    /// `attempt` (1-based) of `max_attempts` failed with `error`; the next
    /// one starts after `delay`.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ActionError, delay: Duration);
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// A permanent failure is returned immediately.  A transient failure on the
/// last allowed attempt is returned as is.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, ActionError>
where
    F: FnMut() -> Result<T, ActionError>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                if let Some(cb) = callback {
                    cb.on_retry(attempt, max_attempts, &e, policy.delay);
                }
                if !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn default_policy_retries_once() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay, Duration::from_secs(2));
    }

    #[test]
    fn success_on_first_try() {
        let result = with_retry(&RetryPolicy::immediate(1), None, || Ok::<_, ActionError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(3), None, || {
            attempts.set(attempts.get() + 1);
            Err(ActionError::permanent("No match for argument"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn transient_failure_then_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&RetryPolicy::immediate(1), None, || {
            attempts.set(attempts.get() + 1);
            if attempts.get() == 1 {
                Err(ActionError::transient("Curl error"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn transient_failure_exhausts_retries() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(1), None, || {
            attempts.set(attempts.get() + 1);
            Err(ActionError::transient("lock held"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn no_retry_policy_tries_once() {
        let attempts = Cell::new(0);
        let _: Result<(), _> = with_retry(&RetryPolicy::no_retry(), None, || {
            attempts.set(attempts.get() + 1);
            Err(ActionError::transient("timed out"))
        });
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn callback_sees_each_retry() {
        struct Recorder(Cell<Vec<(u32, u32)>>);
        impl RetryCallback for Recorder {
            fn on_retry(&self, attempt: u32, max: u32, _: &ActionError, _: Duration) {
                let mut seen = self.0.take();
                seen.push((attempt, max));
                self.0.set(seen);
            }
        }

        let recorder = Recorder(Cell::new(Vec::new()));
        let _: Result<(), _> = with_retry(&RetryPolicy::immediate(2), Some(&recorder), || {
            Err(ActionError::transient("timed out"))
        });
        assert_eq!(recorder.0.take(), vec![(1, 3), (2, 3)]);
    }
}
