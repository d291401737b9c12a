//! # testretry
//!
//! Retry harness for flaky tests providing:
//! - Isolated attempts with buffered logs, soft and hard failures
//! - LIFO cleanups and a cancellation scope per attempt
//! - Count-bounded and deadline-bounded retry policies
//! - Configurable default policy (YAML file and `TESTRETRY_*` env vars)

pub mod config;
pub mod error;
pub mod retry;

pub use config::RetryConfig;
pub use error::{Error, Result};
pub use retry::{run, run_with, Counter, LibTest, Policy, RunReport, SubT, TestingT, Timer};
