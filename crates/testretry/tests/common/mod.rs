//! Common test helpers for testretry integration tests
//!
//! - `RecordingT`: an outer test context that records replayed logs and
//!   `fail_now` calls instead of failing the real test
//! - `init_tracing`: installs a test subscriber once per binary

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use testretry::TestingT;

/// Outer test context that records everything the runner reports.
#[derive(Debug, Clone, Default)]
pub struct RecordingT {
    logs: Arc<Mutex<Vec<String>>>,
    fail_now_calls: Arc<AtomicU32>,
}

impl RecordingT {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines replayed into this context, in order.
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    /// Number of times the runner failed this context.
    pub fn fail_now_calls(&self) -> u32 {
        self.fail_now_calls.load(Ordering::SeqCst)
    }

    /// Assert the context was never failed.
    #[allow(dead_code)]
    pub fn assert_passed(&self) {
        assert_eq!(
            self.fail_now_calls(),
            0,
            "outer test was failed. Replayed logs: {:?}",
            self.logs()
        );
    }

    /// Assert the context was failed exactly once.
    #[allow(dead_code)]
    pub fn assert_failed(&self) {
        assert_eq!(
            self.fail_now_calls(),
            1,
            "expected exactly one fail_now. Replayed logs: {:?}",
            self.logs()
        );
    }
}

impl TestingT for RecordingT {
    fn log(&self, line: &str) {
        self.logs.lock().unwrap().push(line.to_string());
    }

    fn fail_now(&self) {
        self.fail_now_calls.fetch_add(1, Ordering::SeqCst);
    }
}

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
