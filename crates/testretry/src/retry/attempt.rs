//! Per-attempt execution context
//!
//! [`SubT`] is the handle a test body receives for one attempt. It mirrors a
//! test framework's own surface: buffered logs, soft failures
//! ([`SubT::fail`], [`SubT::error`]), hard failures that stop the attempt
//! ([`SubT::fail_now`], [`SubT::fatal`]), LIFO cleanups and a cancellation
//! scope.
//!
//! Hard failures never unwind through the caller. Each attempt body runs as
//! its own tokio task; `fail_now` raises the attempt's abort signal and parks
//! the caller forever, and the task boundary in [`SubT::execute`] aborts and
//! joins the body task along with every helper started through
//! [`SubT::spawn`]. The orchestrating task is never interrupted.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::future::{Future, Pending};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

type Cleanup = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptStatus {
    /// Reset and not yet started
    #[default]
    Fresh,
    /// The body task is executing
    Running,
    /// The body task returned normally
    Completed,
    /// The body task was terminated by `fail_now`, `fatal` or a panic
    Aborted,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptStatus::Fresh => "fresh",
            AttemptStatus::Running => "running",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct AttemptState {
    generation: u64,
    status: AttemptStatus,
    logs: Vec<String>,
    failed: bool,
    cleanups: Vec<Cleanup>,
    cleaned_up: bool,
    helpers: Vec<AbortHandle>,
}

/// The test handle passed to a retried body
///
/// `SubT` is cheap to clone and may be shared with helper tasks spawned by
/// the body. Every clone is bound to the attempt it was issued for: once the
/// next attempt starts, writes through an older clone are discarded.
#[derive(Clone)]
pub struct SubT {
    state: Arc<Mutex<AttemptState>>,
    generation: u64,
    ctx: CancellationToken,
    abort: CancellationToken,
    tasks: TaskTracker,
}

impl Default for SubT {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SubT")
            .field("attempt", &self.generation)
            .field("status", &state.status)
            .field("failed", &state.failed)
            .field("logs", &state.logs.len())
            .field("cleanups", &state.cleanups.len())
            .field("helpers", &state.helpers.len())
            .finish()
    }
}

impl SubT {
    /// Create a fresh context
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AttemptState::default())),
            generation: 0,
            ctx: CancellationToken::new(),
            abort: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    // A panicking cleanup never holds the lock, so poisoning carries no
    // broken invariant.
    fn lock(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, op: &'static str, f: impl FnOnce(&mut AttemptState)) {
        let mut state = self.lock();
        if state.generation != self.generation {
            tracing::debug!(
                op,
                attempt = self.generation,
                current = state.generation,
                "discarding write from a finished attempt"
            );
            return;
        }
        f(&mut state);
    }

    /// Add a log line to the current attempt
    ///
    /// Trailing newlines are trimmed. Use `format_args!` or `format!` for
    /// formatted lines.
    pub fn log(&self, msg: impl fmt::Display) {
        let line = msg.to_string().trim_end_matches('\n').to_string();
        self.update("log", |state| state.logs.push(line));
    }

    /// Mark the current attempt as failed and keep running
    pub fn fail(&self) {
        self.update("fail", |state| state.failed = true);
    }

    /// Add a log line and mark the current attempt as failed
    pub fn error(&self, msg: impl fmt::Display) {
        self.log(msg);
        self.fail();
    }

    /// Mark the current attempt as failed and stop it
    ///
    /// The attempt is failed and its abort signal raised as soon as this is
    /// called. Awaiting the returned future parks the caller until the task
    /// boundary terminates it, so nothing after the `.await` runs. Helper
    /// tasks must be started with [`SubT::spawn`] to be terminated this way.
    /// Outside a retry run the future never resolves.
    #[must_use = "await fail_now() to stop the attempt at this point"]
    pub fn fail_now(&self) -> Pending<Infallible> {
        self.fail();
        self.abort.cancel();
        std::future::pending()
    }

    /// Add a log line, mark the current attempt as failed and stop it
    ///
    /// See [`SubT::fail_now`].
    #[must_use = "await fatal() to stop the attempt at this point"]
    pub fn fatal(&self, msg: impl fmt::Display) -> Pending<Infallible> {
        self.log(msg);
        self.fail_now()
    }

    /// Register a function to run when the attempt ends
    ///
    /// Cleanups run in reverse registration order after the body finishes,
    /// whether it completed or was aborted. A cleanup registered after its
    /// attempt's cleanups already ran is executed immediately.
    pub fn cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.generation == self.generation && !state.cleaned_up {
            state.cleanups.push(Box::new(f));
            return;
        }
        drop(state);

        tracing::debug!(
            attempt = self.generation,
            "attempt already cleaned up, running late cleanup now"
        );
        self.run_cleanup(Box::new(f));
    }

    /// Spawn a helper task bound to the current attempt
    ///
    /// The helper is aborted and joined when the attempt ends, before its
    /// cleanups run, so it may call [`SubT::fail_now`] and anything it holds
    /// is dropped in time. A helper spawned after its attempt ended is
    /// aborted at once.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = self.tasks.spawn(fut);

        let mut state = self.lock();
        let finished = matches!(
            state.status,
            AttemptStatus::Completed | AttemptStatus::Aborted
        );
        if state.generation == self.generation && !finished {
            state.helpers.push(task.abort_handle());
        } else {
            drop(state);
            tracing::debug!(
                attempt = self.generation,
                "attempt already finished, aborting late helper"
            );
            task.abort();
        }
        task
    }

    /// Cancellation scope of the current attempt
    ///
    /// Cancelled just before cleanups run, and whenever the outer test
    /// context's own token is cancelled.
    pub fn context(&self) -> CancellationToken {
        self.ctx.clone()
    }

    /// Whether the most recent attempt has failed
    pub fn failed(&self) -> bool {
        self.lock().failed
    }

    /// Log lines buffered by the most recent attempt
    pub fn logs(&self) -> Vec<String> {
        self.lock().logs.clone()
    }

    /// Lifecycle state of the most recent attempt
    pub fn status(&self) -> AttemptStatus {
        self.lock().status
    }

    /// Attempt number this handle belongs to (1-indexed, 0 before any reset)
    pub fn attempt(&self) -> u64 {
        self.generation
    }

    /// Start a new attempt
    ///
    /// Clears logs, failure and cleanups, retires every handle issued for the
    /// previous attempt, and derives a new cancellation scope from `parent`.
    pub(crate) fn reset(&mut self, parent: Option<&CancellationToken>) {
        let mut state = self.lock();
        if !state.cleanups.is_empty() {
            tracing::warn!(
                attempt = state.generation,
                pending = state.cleanups.len(),
                "dropping cleanups that never ran"
            );
        }

        state.generation += 1;
        state.status = AttemptStatus::Fresh;
        state.logs.clear();
        state.failed = false;
        state.cleanups.clear();
        state.cleaned_up = false;
        state.helpers.clear();

        let generation = state.generation;
        drop(state);

        self.generation = generation;
        self.ctx = parent
            .map(CancellationToken::child_token)
            .unwrap_or_else(CancellationToken::new);
        self.abort = CancellationToken::new();
        self.tasks = TaskTracker::new();
    }

    /// Run `body` as the attempt's own task and wait for it to finish
    ///
    /// Returns once the task has completed, panicked, or been aborted by
    /// `fail_now` and fully torn down, and every helper from [`SubT::spawn`]
    /// has been aborted and dropped. Anything registered while the body or a
    /// helper unwinds is in place before [`SubT::run_cleanups`].
    pub(crate) async fn execute<Fut>(&self, body: Fut) -> AttemptStatus
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.update("execute", |state| state.status = AttemptStatus::Running);
        let mut task = tokio::spawn(body);

        let status = tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(()) => AttemptStatus::Completed,
                Err(err) if err.is_panic() => {
                    self.error(format!("panicked: {}", panic_message(err.into_panic().as_ref())));
                    AttemptStatus::Aborted
                }
                Err(_) => {
                    self.error("attempt task was cancelled");
                    AttemptStatus::Aborted
                }
            },
            _ = self.abort.cancelled() => {
                task.abort();
                if let Err(err) = task.await {
                    if err.is_panic() {
                        self.error(format!("panicked: {}", panic_message(err.into_panic().as_ref())));
                    }
                }
                AttemptStatus::Aborted
            }
        };

        self.update("execute", |state| state.status = status);
        self.stop_helpers().await;
        status
    }

    // Status is already final, so `spawn` cannot add helpers behind our back.
    async fn stop_helpers(&self) {
        let helpers = std::mem::take(&mut self.lock().helpers);
        for helper in &helpers {
            helper.abort();
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Cancel the attempt's scope, then run its cleanups in LIFO order
    ///
    /// Must be called once per attempt, after [`SubT::execute`] returned.
    /// Returns the number of cleanups run.
    pub(crate) fn run_cleanups(&self) -> usize {
        self.ctx.cancel();

        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.lock();
                match state.cleanups.pop() {
                    Some(cleanup) => cleanup,
                    None => {
                        state.cleaned_up = true;
                        break;
                    }
                }
            };
            self.run_cleanup(next);
            ran += 1;
        }
        ran
    }

    fn run_cleanup(&self, cleanup: Cleanup) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
            let message = panic_message(payload.as_ref());
            tracing::warn!(attempt = self.generation, error = %message, "cleanup panicked");
            self.error(format!("cleanup panicked: {}", message));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
