//! Retry observation and logging
//!
//! This module provides the `RetryObserver` trait for monitoring attempts
//! and a `TracingObserver` implementation that logs using the `tracing` crate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::attempt::AttemptStatus;

/// Observer trait for attempt events
///
/// Implement this trait to receive callbacks while a body is retried.
///
/// # Example
///
/// ```rust
/// use testretry::retry::{AttemptStatus, RetryObserver};
/// use std::time::Duration;
///
/// struct FlakeCounter;
///
/// impl RetryObserver for FlakeCounter {
///     fn on_attempt_start(&self, attempt: u32) {}
///
///     fn on_attempt_failed(&self, attempt: u32, status: AttemptStatus) {
///         // Record a flaky run
///     }
///
///     fn on_success(&self, attempt: u32, total_duration: Duration) {}
///
///     fn on_exhausted(&self, attempts: u32, total_duration: Duration) {}
/// }
/// ```
pub trait RetryObserver: Send + Sync {
    /// Called before the body starts for an attempt (1-indexed)
    fn on_attempt_start(&self, attempt: u32);

    /// Called after a failed attempt's cleanups have run
    ///
    /// `status` tells a soft failure (`Completed`) from a hard one (`Aborted`).
    fn on_attempt_failed(&self, attempt: u32, status: AttemptStatus);

    /// Called when an attempt passes
    fn on_success(&self, attempt: u32, total_duration: Duration);

    /// Called when the policy ran out with the last attempt still failing
    fn on_exhausted(&self, attempts: u32, total_duration: Duration);
}

/// A no-op observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_attempt_start(&self, _attempt: u32) {}

    fn on_attempt_failed(&self, _attempt: u32, _status: AttemptStatus) {}

    fn on_success(&self, _attempt: u32, _total_duration: Duration) {}

    fn on_exhausted(&self, _attempts: u32, _total_duration: Duration) {}
}

/// An observer that logs attempt events using the `tracing` crate
///
/// # Log Levels
///
/// - `on_attempt_start`: DEBUG
/// - `on_attempt_failed`: WARN
/// - `on_success`: INFO (if > 1 attempt) or DEBUG (first attempt)
/// - `on_exhausted`: ERROR
#[derive(Debug, Clone)]
pub struct TracingObserver {
    /// Name of the test being retried (for log context)
    operation: String,
}

impl TracingObserver {
    /// Create a new tracing observer
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// Get the operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl RetryObserver for TracingObserver {
    fn on_attempt_start(&self, attempt: u32) {
        tracing::debug!(
            operation = %self.operation,
            attempt = attempt,
            "starting attempt"
        );
    }

    fn on_attempt_failed(&self, attempt: u32, status: AttemptStatus) {
        tracing::warn!(
            operation = %self.operation,
            attempt = attempt,
            status = %status,
            "attempt failed"
        );
    }

    fn on_success(&self, attempt: u32, total_duration: Duration) {
        if attempt > 1 {
            tracing::info!(
                operation = %self.operation,
                attempt = attempt,
                total_duration_ms = total_duration.as_millis() as u64,
                "passed after retry"
            );
        } else {
            tracing::debug!(
                operation = %self.operation,
                duration_ms = total_duration.as_millis() as u64,
                "passed on first attempt"
            );
        }
    }

    fn on_exhausted(&self, attempts: u32, total_duration: Duration) {
        tracing::error!(
            operation = %self.operation,
            attempts = attempts,
            total_duration_ms = total_duration.as_millis() as u64,
            "retry policy exhausted, last attempt failed"
        );
    }
}

/// An observer that counts attempt events
///
/// Useful for testing and flakiness reporting.
#[derive(Debug, Default)]
pub struct StatsObserver {
    attempt_starts: AtomicU32,
    failures: AtomicU32,
    aborts: AtomicU32,
    successes: AtomicU32,
    exhaustions: AtomicU32,
}

impl StatsObserver {
    /// Create a new stats observer
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of attempt starts
    pub fn attempt_starts(&self) -> u32 {
        self.attempt_starts.load(Ordering::SeqCst)
    }

    /// Get the number of failed attempts
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Get the number of failed attempts that were aborted
    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Get the number of successes
    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    /// Get the number of exhaustions
    pub fn exhaustions(&self) -> u32 {
        self.exhaustions.load(Ordering::SeqCst)
    }
}

impl RetryObserver for StatsObserver {
    fn on_attempt_start(&self, _attempt: u32) {
        self.attempt_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, _attempt: u32, status: AttemptStatus) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        if status == AttemptStatus::Aborted {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_success(&self, _attempt: u32, _total_duration: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _attempts: u32, _total_duration: Duration) {
        self.exhaustions.fetch_add(1, Ordering::SeqCst);
    }
}

/// Implement RetryObserver for Arc<T> where T: RetryObserver
impl<T: RetryObserver + ?Sized> RetryObserver for std::sync::Arc<T> {
    fn on_attempt_start(&self, attempt: u32) {
        (**self).on_attempt_start(attempt)
    }

    fn on_attempt_failed(&self, attempt: u32, status: AttemptStatus) {
        (**self).on_attempt_failed(attempt, status)
    }

    fn on_success(&self, attempt: u32, total_duration: Duration) {
        (**self).on_success(attempt, total_duration)
    }

    fn on_exhausted(&self, attempts: u32, total_duration: Duration) {
        (**self).on_exhausted(attempts, total_duration)
    }
}

/// Implement RetryObserver for Box<T> where T: RetryObserver
impl<T: RetryObserver + ?Sized> RetryObserver for Box<T> {
    fn on_attempt_start(&self, attempt: u32) {
        (**self).on_attempt_start(attempt)
    }

    fn on_attempt_failed(&self, attempt: u32, status: AttemptStatus) {
        (**self).on_attempt_failed(attempt, status)
    }

    fn on_success(&self, attempt: u32, total_duration: Duration) {
        (**self).on_success(attempt, total_duration)
    }

    fn on_exhausted(&self, attempts: u32, total_duration: Duration) {
        (**self).on_exhausted(attempts, total_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_observer_counts_aborts_separately() {
        let observer = StatsObserver::new();

        observer.on_attempt_start(1);
        observer.on_attempt_failed(1, AttemptStatus::Completed);
        observer.on_attempt_start(2);
        observer.on_attempt_failed(2, AttemptStatus::Aborted);
        observer.on_attempt_start(3);
        observer.on_success(3, Duration::from_millis(20));

        assert_eq!(observer.attempt_starts(), 3);
        assert_eq!(observer.failures(), 2);
        assert_eq!(observer.aborts(), 1);
        assert_eq!(observer.successes(), 1);
        assert_eq!(observer.exhaustions(), 0);
    }

    #[test]
    fn test_tracing_observer_creation() {
        let observer = TracingObserver::new("test_flaky_endpoint");
        assert_eq!(observer.operation(), "test_flaky_endpoint");
        assert_eq!(TracingObserver::default().operation(), "retry");
    }

    #[test]
    fn test_boxed_observer() {
        let stats = std::sync::Arc::new(StatsObserver::new());
        let observer: Box<dyn RetryObserver> = Box::new(stats.clone());

        observer.on_attempt_start(1);
        observer.on_exhausted(1, Duration::ZERO);

        assert_eq!(stats.attempt_starts(), 1);
        assert_eq!(stats.exhaustions(), 1);
    }
}
