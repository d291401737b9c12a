//! Retry orchestration
//!
//! The runner drives one test body through a policy: every permitted
//! attempt gets a freshly reset [`SubT`], runs as its own task, is joined,
//! and has its cleanups run before the next one starts. Only the last
//! attempt is reported to the outer test context.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;

use super::attempt::SubT;
use super::observer::{RetryObserver, TracingObserver};
use super::policy::Policy;
use super::testing::TestingT;

/// Outcome of a retry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Number of attempts that ran
    pub attempts: u32,
    /// Whether the last attempt failed
    pub failed: bool,
    /// Wall time from the first policy query to the end of the last attempt
    pub elapsed: Duration,
    /// Log lines of the last attempt, as replayed to the outer context
    pub logs: Vec<String>,
}

impl RunReport {
    /// Whether the last attempt passed
    pub fn passed(&self) -> bool {
        !self.failed
    }
}

/// Retry `body` with the default policy
///
/// The default is a deadline-bounded policy built from
/// [`RetryConfig::default`] (5s budget, 10ms between attempts).
///
/// # Example
///
/// ```rust,no_run
/// use testretry::retry::LibTest;
///
/// async fn example() {
///     let t = LibTest::new("test_cache_warm");
///     testretry::run(&t, |t| async move {
///         t.log("checking cache");
///         if !cache_is_warm() {
///             t.fatal("cache still cold").await;
///         }
///     })
///     .await;
/// }
/// # fn cache_is_warm() -> bool { true }
/// ```
pub async fn run<T, F, Fut>(t: &T, body: F) -> RunReport
where
    T: TestingT + ?Sized,
    F: FnMut(SubT) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    Runner::default().run(t, body).await
}

/// Retry `body` with `policy`
pub async fn run_with<T, P, F, Fut>(t: &T, policy: P, body: F) -> RunReport
where
    T: TestingT + ?Sized,
    P: Policy,
    F: FnMut(SubT) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    Runner::default().run_with(t, policy, body).await
}

/// Builder for configuring a `Runner`
///
/// # Example
///
/// ```rust
/// use testretry::retry::{Runner, StatsObserver};
/// use testretry::RetryConfig;
/// use std::time::Duration;
///
/// let runner = Runner::builder()
///     .with_config(RetryConfig::new(Duration::from_secs(2), Duration::from_millis(50)))
///     .with_observer(StatsObserver::new())
///     .build();
/// assert_eq!(runner.config().timeout(), Duration::from_secs(2));
/// ```
pub struct RunnerBuilder<O = TracingObserver> {
    config: RetryConfig,
    observer: O,
}

impl Default for RunnerBuilder<TracingObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerBuilder<TracingObserver> {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: RetryConfig::default(),
            observer: TracingObserver::default(),
        }
    }
}

impl<O> RunnerBuilder<O> {
    /// Set the config used to build the default policy
    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the observer
    pub fn with_observer<O2>(self, observer: O2) -> RunnerBuilder<O2> {
        RunnerBuilder {
            config: self.config,
            observer,
        }
    }

    /// Build the runner
    pub fn build(self) -> Runner<O> {
        Runner {
            config: self.config,
            observer: self.observer,
        }
    }
}

/// Retries test bodies and reports the last attempt to the outer test
///
/// Use `Runner::builder()` to configure one.
pub struct Runner<O = TracingObserver> {
    config: RetryConfig,
    observer: O,
}

impl Default for Runner<TracingObserver> {
    fn default() -> Self {
        RunnerBuilder::new().build()
    }
}

impl Runner<TracingObserver> {
    /// Start configuring a runner
    pub fn builder() -> RunnerBuilder<TracingObserver> {
        RunnerBuilder::new()
    }
}

impl<O> Runner<O>
where
    O: RetryObserver,
{
    /// The config the default policy is built from
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry `body` with a fresh policy from this runner's config
    pub async fn run<T, F, Fut>(&self, t: &T, body: F) -> RunReport
    where
        T: TestingT + ?Sized,
        F: FnMut(SubT) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.run_with(t, self.config.policy(), body).await
    }

    /// Retry `body` with `policy`
    ///
    /// Each attempt runs only after `policy` permits it. The loop stops at
    /// the first passing attempt or when the policy is exhausted. The last
    /// attempt's logs are then replayed into `t`, and `t.fail_now()` is
    /// called if that attempt failed.
    ///
    /// Attempt bodies are spawned with `tokio::spawn`, so this must be
    /// awaited inside a tokio runtime.
    pub async fn run_with<T, P, F, Fut>(&self, t: &T, mut policy: P, mut body: F) -> RunReport
    where
        T: TestingT + ?Sized,
        P: Policy,
        F: FnMut(SubT) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(helper) = t.as_helper() {
            helper.helper();
        }
        let parent = t.as_cancellable().map(|c| c.cancellation_token());

        let start = Instant::now();
        let mut sub = SubT::new();
        let mut attempts = 0;

        while policy.next().await {
            attempts += 1;
            self.observer.on_attempt_start(attempts);

            sub.reset(parent.as_ref());
            let status = sub.execute(body(sub.clone())).await;
            let cleanups = sub.run_cleanups();
            tracing::trace!(attempt = attempts, status = %status, cleanups, "attempt finished");

            if !sub.failed() {
                self.observer.on_success(attempts, start.elapsed());
                break;
            }
            self.observer.on_attempt_failed(attempts, status);
        }

        let report = RunReport {
            attempts,
            failed: sub.failed(),
            elapsed: start.elapsed(),
            logs: sub.logs(),
        };

        for line in &report.logs {
            t.log(line);
        }
        if report.failed {
            self.observer.on_exhausted(attempts, report.elapsed);
            t.fail_now();
        }
        report
    }
}
