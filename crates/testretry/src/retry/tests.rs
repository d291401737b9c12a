//! Integration tests for the retry module
//!
//! These tests verify the complete retry flow: policies, attempt isolation,
//! cleanup ordering and what reaches the outer test context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::retry::attempt::{AttemptStatus, SubT};
use crate::retry::policy::{Counter, Policy, Timer};
use crate::retry::runner::{run, run_with};
use crate::retry::testing::{Cancellable, TestingT};

/// Outer test double recording what the runner reports
#[derive(Default)]
struct MockT {
    logs: Mutex<Vec<String>>,
    fail_now_calls: AtomicU32,
    token: Option<CancellationToken>,
}

impl MockT {
    fn with_token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            ..Self::default()
        }
    }

    fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    fn fail_now_calls(&self) -> u32 {
        self.fail_now_calls.load(Ordering::SeqCst)
    }
}

impl TestingT for MockT {
    fn log(&self, line: &str) {
        self.logs.lock().unwrap().push(line.to_string());
    }

    fn fail_now(&self) {
        self.fail_now_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn as_cancellable(&self) -> Option<&dyn Cancellable> {
        self.token.as_ref().map(|_| self as &dyn Cancellable)
    }
}

impl Cancellable for MockT {
    fn cancellation_token(&self) -> CancellationToken {
        self.token.clone().unwrap_or_default()
    }
}

async fn drain<P: Policy>(mut policy: P) -> (u32, Duration) {
    let start = Instant::now();
    let mut runs = 0;
    while policy.next().await {
        runs += 1;
    }
    (runs, start.elapsed())
}

// ============================================================================
// Policy Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_counter_next() {
    let (runs, elapsed) = drain(Counter::new(3, Duration::from_millis(100))).await;

    assert_eq!(runs, 3);
    assert_eq!(elapsed, Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_counter_is_terminal() {
    for attempts in 1..=5 {
        let mut policy = Counter::new(attempts, Duration::from_millis(1));
        for _ in 0..attempts {
            assert!(policy.next().await);
        }
        for _ in 0..3 {
            assert!(!policy.next().await, "counter({}) granted extra run", attempts);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_timer_next() {
    let (runs, elapsed) = drain(Timer::new(
        Duration::from_millis(200),
        Duration::from_millis(100),
    ))
    .await;

    assert_eq!(runs, 4);
    assert_eq!(elapsed, Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_timer_budget_includes_body_time() {
    let timeout = Duration::from_millis(300);
    let sleep = Duration::from_millis(40);
    let mut policy = Timer::new(timeout, sleep);

    let start = Instant::now();
    let mut last_grant = Duration::ZERO;
    let mut runs = 0;
    while policy.next().await {
        last_grant = start.elapsed();
        runs += 1;
        tokio::time::sleep(Duration::from_millis(70)).await;
    }

    assert!(runs >= 2);
    assert!(last_grant <= timeout + sleep);
    assert!(!policy.next().await);
}

#[tokio::test(start_paused = true)]
async fn test_timer_slow_body_exhausts_budget_in_one_attempt() {
    let mut policy = Timer::new(Duration::from_millis(50), Duration::from_millis(10));

    assert!(policy.next().await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!policy.next().await);
}

// ============================================================================
// Run Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_default_policy_spends_full_budget() {
    let t = MockT::default();

    let start = Instant::now();
    let report = run(&t, |sub| async move {
        sub.fatal("test message").await;
    })
    .await;
    let elapsed = start.elapsed();

    assert_eq!(t.logs(), vec!["test message"]);
    assert_eq!(t.fail_now_calls(), 1);
    assert!(report.attempts > 1);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed <= Duration::from_secs(5) + Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_run_with_allows_passing() {
    let t = MockT::default();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let report = run_with(&t, Counter::new(3, Duration::from_millis(10)), move |_sub| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {}
    })
    .await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(report.elapsed, Duration::ZERO);
    assert!(t.logs().is_empty());
    assert_eq!(t.fail_now_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_with_handles_failing() {
    let t = MockT::default();
    let runs = Arc::new(AtomicU32::new(0));

    let counter = runs.clone();
    let report = run_with(&t, Counter::new(3, Duration::from_millis(10)), move |sub| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            sub.fatal("test message").await;
        }
    })
    .await;

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(report.elapsed, Duration::from_millis(20));
    assert_eq!(t.logs(), vec!["test message"]);
    assert_eq!(t.fail_now_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_only_last_attempt_logs_are_replayed() {
    let t = MockT::default();

    let report = run_with(&t, Counter::new(3, Duration::from_millis(1)), |sub| async move {
        sub.log(format!("attempt {}", sub.attempt()));
        if sub.attempt() < 3 {
            sub.error("not ready");
        }
    })
    .await;

    assert!(report.passed());
    assert_eq!(report.attempts, 3);
    assert_eq!(t.logs(), vec!["attempt 3"]);
    assert_eq!(t.fail_now_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_budget_still_runs_once() {
    for report in [
        run_with(&MockT::default(), Counter::new(0, Duration::ZERO), |_sub| async {}).await,
        run_with(&MockT::default(), Timer::new(Duration::ZERO, Duration::ZERO), |_sub| async {})
            .await,
    ] {
        assert_eq!(report.attempts, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_body_is_retried() {
    let t = MockT::default();

    let report = run_with(&t, Counter::new(3, Duration::from_millis(1)), |sub| async move {
        assert!(sub.attempt() >= 2, "attempt {} too early", sub.attempt());
    })
    .await;

    assert!(report.passed());
    assert_eq!(report.attempts, 2);
    assert_eq!(t.fail_now_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cleanups_finish_before_next_attempt() {
    let t = MockT::default();
    let events = Arc::new(Mutex::new(Vec::new()));

    let recorded = events.clone();
    run_with(&t, Counter::new(2, Duration::from_millis(1)), move |sub| {
        let events = recorded.clone();
        async move {
            let attempt = sub.attempt();
            events.lock().unwrap().push(format!("start {}", attempt));
            for i in 0..2 {
                let events = events.clone();
                sub.cleanup(move || {
                    events
                        .lock()
                        .unwrap()
                        .push(format!("cleanup {}.{}", attempt, i))
                });
            }
            sub.fail_now().await;
        }
    })
    .await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "start 1",
            "cleanup 1.1",
            "cleanup 1.0",
            "start 2",
            "cleanup 2.1",
            "cleanup 2.0",
        ]
    );
    assert_eq!(t.fail_now_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_outer_cancellation_reaches_every_attempt() {
    let token = CancellationToken::new();
    let t = MockT::with_token(token.clone());
    token.cancel();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    run_with(&t, Counter::new(2, Duration::ZERO), move |sub| {
        recorded.lock().unwrap().push(sub.context().is_cancelled());
        async move { sub.fail() }
    })
    .await;

    assert_eq!(*seen.lock().unwrap(), vec![true, true]);
}

#[tokio::test(start_paused = true)]
async fn test_detached_helper_cannot_leak_into_next_attempt() {
    let t = MockT::default();

    let report = run_with(&t, Counter::new(2, Duration::ZERO), |sub| async move {
        if sub.attempt() == 1 {
            let helper = sub.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                helper.error("late write from attempt 1");
                helper.cleanup(|| {});
            });
            sub.fail();
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        sub.log("attempt 2 done");
    })
    .await;

    assert!(report.passed());
    assert_eq!(t.logs(), vec!["attempt 2 done"]);
}

#[tokio::test]
async fn test_attempt_status_reported_for_soft_and_hard_failures() {
    let soft = SubT::new();
    let sub = soft.clone();
    assert_eq!(
        soft.execute(async move { sub.fail() }).await,
        AttemptStatus::Completed
    );

    let hard = SubT::new();
    let sub = hard.clone();
    assert_eq!(
        hard.execute(async move {
            sub.fail_now().await;
        })
        .await,
        AttemptStatus::Aborted
    );
}
