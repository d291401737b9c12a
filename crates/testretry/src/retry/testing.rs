//! The outer test context
//!
//! A retry run reports into the test that hosts it. [`TestingT`] is the part
//! of that host the runner needs: a log sink and a way to fail the test
//! immediately. Optional capabilities are discovered through the `as_*`
//! accessors, which return `None` unless the host implements them.

use tokio_util::sync::CancellationToken;

/// A partial test framework handle
pub trait TestingT {
    /// Record a log line against the test
    fn log(&self, line: &str);

    /// Mark the test as failed and stop it
    fn fail_now(&self);

    /// Helper-marking capability, if supported
    fn as_helper(&self) -> Option<&dyn Helper> {
        None
    }

    /// Cancellation capability, if supported
    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        None
    }
}

/// Marks the calling function as a test helper so failures are attributed
/// to its caller
pub trait Helper {
    /// Mark the caller as a helper
    fn helper(&self);
}

/// Exposes the test's cancellation token; every attempt's scope is derived
/// from it
pub trait Cancellable {
    /// Token cancelled when the outer test is cancelled
    fn cancellation_token(&self) -> CancellationToken;
}

impl<T: TestingT + ?Sized> TestingT for &T {
    fn log(&self, line: &str) {
        (**self).log(line)
    }

    fn fail_now(&self) {
        (**self).fail_now()
    }

    fn as_helper(&self) -> Option<&dyn Helper> {
        (**self).as_helper()
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        (**self).as_cancellable()
    }
}

/// Adapter for Rust's built-in test harness
///
/// Log lines go to stdout, which the harness captures per test and prints
/// when the test fails. `fail_now` panics, failing the enclosing `#[test]`.
///
/// # Example
///
/// ```rust,no_run
/// use testretry::retry::LibTest;
///
/// async fn test_eventually_consistent() {
///     let t = LibTest::new("test_eventually_consistent");
///     testretry::run(&t, |t| async move {
///         if !lookup().await {
///             t.fatal("record not visible yet").await;
///         }
///     })
///     .await;
/// }
/// # async fn lookup() -> bool { true }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LibTest {
    name: String,
    token: Option<CancellationToken>,
}

impl LibTest {
    /// Create an adapter for the named test
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: None,
        }
    }

    /// Attach a cancellation token shared by every attempt
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Get the test name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TestingT for LibTest {
    fn log(&self, line: &str) {
        println!("{}", line);
    }

    fn fail_now(&self) {
        panic!("{}: failed after retrying", self.name);
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        self.token.as_ref().map(|_| self as &dyn Cancellable)
    }
}

impl Cancellable for LibTest {
    fn cancellation_token(&self) -> CancellationToken {
        self.token.clone().unwrap_or_default()
    }
}
