//! Retry policies
//!
//! A policy answers one question before every attempt: may another attempt
//! run? The first call always grants permission immediately. Later grants
//! are preceded by the policy's delay, awaited inside [`Policy::next`] so the
//! attempt does not start before the delay has elapsed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// A retry strategy
///
/// Policies are stateful and single-use: create a fresh one for each run.
/// Once `next` returns `false` it must never return `true` again.
///
/// # Example
///
/// ```rust
/// use testretry::retry::{Counter, Policy};
/// use std::time::Duration;
///
/// # async fn example() {
/// let mut policy = Counter::new(3, Duration::from_millis(10));
/// let mut runs = 0;
/// while policy.next().await {
///     runs += 1;
/// }
/// assert_eq!(runs, 3);
/// # }
/// ```
#[async_trait]
pub trait Policy: Send {
    /// Determine whether another attempt may run
    ///
    /// Called before every attempt, including the first.
    async fn next(&mut self) -> bool;
}

#[async_trait]
impl<P: Policy + ?Sized> Policy for Box<P> {
    async fn next(&mut self) -> bool {
        (**self).next().await
    }
}

#[async_trait]
impl<'a, P: Policy + ?Sized> Policy for &'a mut P {
    async fn next(&mut self) -> bool {
        (**self).next().await
    }
}

/// A count-bounded retry policy
///
/// Permits `attempts` runs, sleeping `sleep` before every run after the
/// first. A budget of zero still permits the first run.
#[derive(Debug, Clone)]
pub struct Counter {
    attempts: u32,
    sleep: Duration,
    count: u32,
}

impl Counter {
    /// Create a counter based retry policy
    pub fn new(attempts: u32, sleep: Duration) -> Self {
        Self {
            attempts,
            sleep,
            count: 0,
        }
    }

    /// Number of runs granted so far
    pub fn count(&self) -> u32 {
        self.count
    }
}

#[async_trait]
impl Policy for Counter {
    async fn next(&mut self) -> bool {
        if self.count == 0 {
            self.count = 1;
            return true;
        }

        if self.count >= self.attempts {
            return false;
        }

        tokio::time::sleep(self.sleep).await;
        self.count += 1;
        true
    }
}

/// A deadline-bounded retry policy
///
/// The deadline is fixed on the first call to `now + timeout`. Each later
/// call denies once the deadline has passed, otherwise sleeps `sleep` and
/// permits. A zero timeout permits only the first run. The body's own run time counts against the budget, so a slow
/// body can exhaust it in a single attempt.
#[derive(Debug, Clone)]
pub struct Timer {
    timeout: Duration,
    sleep: Duration,
    deadline: Option<Instant>,
}

impl Timer {
    /// Create a time based retry policy
    pub fn new(timeout: Duration, sleep: Duration) -> Self {
        Self {
            timeout,
            sleep,
            deadline: None,
        }
    }

    /// The absolute stop time, once the first call has fixed it
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[async_trait]
impl Policy for Timer {
    async fn next(&mut self) -> bool {
        let Some(deadline) = self.deadline else {
            self.deadline = Some(Instant::now() + self.timeout);
            return true;
        };

        if self.timeout.is_zero() || Instant::now() > deadline {
            return false;
        }

        tokio::time::sleep(self.sleep).await;
        true
    }
}
