//! Bounded optimistic retry.
//!
//! Concurrent operations on overlapping streams resolve by retrying the
//! loser: the whole operation (load, decide, commit) re-runs against the
//! fresh state. Only concurrency conflicts are retried; every other error
//! surfaces immediately.

use std::thread;
use std::time::Duration;

use depot_core::DomainError;
use tracing::warn;

use crate::unit_of_work::WorkError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying concurrency conflicts with exponential backoff
    /// (`base_delay * 2^attempt`). After `max_attempts` the conflict is
    /// surfaced as `DomainError::ConcurrencyConflict`.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, WorkError>) -> Result<T, WorkError> {
        let mut attempt: u32 = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_concurrency_conflict() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(WorkError::Domain(DomainError::conflict(format!(
                            "operation failed after {attempt} attempts: {err}"
                        ))));
                    }
                    warn!(attempt, error = %err, "concurrency conflict, retrying");
                    thread::sleep(self.base_delay * 2u32.saturating_pow(attempt - 1));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use depot_core::DomainError;

    use super::*;
    use crate::event_store::EventStoreError;

    fn conflict() -> WorkError {
        WorkError::Store(EventStoreError::Concurrency("stale".to_string()))
    }

    #[test]
    fn retries_conflicts_until_success() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(0),
        };
        let mut calls = 0;
        let result: Result<u32, WorkError> = policy.run(|| {
            calls += 1;
            if calls < 3 { Err(conflict()) } else { Ok(7) }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausted_retries_surface_a_conflict() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(0),
        };
        let err = policy
            .run(|| -> Result<(), WorkError> { Err(conflict()) })
            .unwrap_err();
        assert!(matches!(
            err,
            WorkError::Domain(DomainError::ConcurrencyConflict(_))
        ));
    }

    #[test]
    fn non_conflict_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let err = policy
            .run(|| -> Result<(), WorkError> {
                calls += 1;
                Err(WorkError::Domain(DomainError::validation("bad input")))
            })
            .unwrap_err();
        assert!(matches!(err, WorkError::Domain(DomainError::Validation(_))));
        assert_eq!(calls, 1);
    }
}
