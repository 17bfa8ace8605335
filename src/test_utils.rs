//! Test utilities for appverify.
//!
//! This module provides shared helpers for unit and integration tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - Fault assertion macros
//! - Scripted begin handlers
//!
//! # Example
//! ```
//! use appverify::test_utils::init_test_logging;
//!
//! fn my_test() {
//!     init_test_logging();
//!     appverify::test_phase!("my_test");
//!     // test code
//!     appverify::test_complete!("my_test");
//! }
//! # my_test();
//! ```

use std::sync::{Arc, Mutex, Once};

use tracing_subscriber::fmt::format::FmtSpan;

use crate::verifier::{AsyncCallback, AsyncState, BeginResult, ResultRef, ResultToken};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    match ENV_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Begin handler that completes synchronously and returns its token.
///
/// The token carries the state passed to the handler.
pub fn sync_begin(cb: AsyncCallback, state: AsyncState) -> BeginResult {
    let token: ResultRef = ResultToken::completed(state, true);
    cb(Some(Arc::clone(&token)));
    Ok(Some(token))
}

/// Slot a deferred begin handler parks its callback and token in.
pub type Parked = Arc<Mutex<Option<(AsyncCallback, Arc<ResultToken>)>>>;

/// Begin handler that returns a pending token and parks the callback.
///
/// Complete it later with [`complete_parked`].
pub fn deferred_begin(
    parked: &Parked,
) -> impl FnOnce(AsyncCallback, AsyncState) -> BeginResult + Send + 'static {
    let parked = Arc::clone(parked);
    move |cb: AsyncCallback, state: AsyncState| -> BeginResult {
        let token = ResultToken::new(state);
        let out: ResultRef = token.clone();
        *lock(&parked) = Some((cb, token));
        Ok(Some(out))
    }
}

/// Completes a parked operation asynchronously and fires its callback.
///
/// Returns `false` if nothing was parked.
pub fn complete_parked(parked: &Parked) -> bool {
    let Some((cb, token)) = lock(parked).take() else {
        return false;
    };
    token.complete(false);
    cb(Some(token));
    true
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an operation recorded a fault with the given code.
#[macro_export]
macro_rules! assert_fault {
    ($operation:expr, $code:expr) => {
        match $operation.fault() {
            Some(fault) => assert_eq!(fault.code(), $code, "unexpected fault: {}", fault),
            None => panic!(
                "expected fault {:?}, operation is {:?}",
                $code,
                $operation.state()
            ),
        }
    };
}

/// Assert that an operation finished without a fault.
#[macro_export]
macro_rules! assert_no_fault {
    ($operation:expr) => {
        if let Some(fault) = $operation.fault() {
            panic!("expected no fault, got {}", fault);
        }
    };
}
