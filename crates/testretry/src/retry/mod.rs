//! Retry harness for flaky tests
//!
//! A test body is run repeatedly under a [`Policy`] until an attempt passes
//! or the policy runs out. Each attempt gets an isolated [`SubT`] that
//! behaves like a test handle of its own:
//!
//! - `log` buffers lines for the attempt
//! - `fail` / `error` record a failure and keep going
//! - `fail_now` / `fatal` record a failure and stop the attempt at once,
//!   without unwinding into the runner
//! - `cleanup` registers functions run in LIFO order when the attempt ends
//! - `context` is a cancellation token cancelled just before cleanups run
//! - `spawn` starts helper tasks that are torn down when the attempt ends
//!
//! Only the last attempt is reported to the outer [`TestingT`]: its logs are
//! replayed, and the outer test is failed if the attempt failed.
//!
//! # Policies
//!
//! - [`Counter`]: a fixed number of attempts with a fixed sleep between them
//! - [`Timer`]: attempts until a deadline, polling at a fixed interval
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use testretry::retry::{run_with, Counter, LibTest};
//!
//! async fn example() {
//!     let t = LibTest::new("test_leader_elected");
//!     run_with(&t, Counter::new(5, Duration::from_millis(100)), |t| async move {
//!         let ctx = t.context();
//!         t.cleanup(move || ctx.cancel());
//!         if !leader_elected().await {
//!             t.fatal("no leader yet").await;
//!         }
//!     })
//!     .await;
//! }
//! # async fn leader_elected() -> bool { true }
//! ```

mod attempt;
mod observer;
mod policy;
mod runner;
mod testing;

pub use attempt::{AttemptStatus, SubT};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use policy::{Counter, Policy, Timer};
pub use runner::{run, run_with, RunReport, Runner, RunnerBuilder};
pub use testing::{Cancellable, Helper, LibTest, TestingT};

#[cfg(test)]
mod tests;
