//! Verification state machine for one begin/callback operation.
//!
//! ```text
//! NotStarted ──start──► Started ──callback──► CompletedSynchronously ──┐
//!                          │                  CompletedAsynchronously ─┴─► Dispatched
//!                          └──handler Err──► HandlerFailed
//!
//! any state ──violation──► Faulted
//! ```
//!
//! Checks run at three checkpoints: when the operation starts, when the
//! callback fires, and when the begin handler returns. Each violated check
//! raises one [`ErrorCode`] through [`OperationVerifier::raise`], moves the
//! operation to `Faulted` and reports the fault to the sink. The first fault
//! is the one the operation records; later faults are still reported.
//!
//! The outcome settles as dispatched only once the callback has been
//! delivered *and* the begin handler's return has passed its checks, in
//! whichever order the two happen. A callback that fires inside the begin
//! call therefore cannot report success ahead of a fault on return.
//!
//! A latch registered with [`OperationVerifier::with_latch`] is released
//! exactly once, together with the outcome: on dispatch, on `HandlerFailed`
//! or on the first fault. A settled outcome is final. Faults raised after it
//! (a second callback, a callback after the handler failed) are reported and
//! kept as [`OperationVerifier::fault`], but waiters have already moved on.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::host::{ContextId, HostContext};
use super::result::{
    same_result, same_state, AsyncCallback, AsyncState, BeginResult, CompletionCallback, ResultRef,
};
use super::sink::FaultSink;
use crate::error::{BeginError, ErrorCode, VerifierFault};
use crate::sync::{Claim, Completion, CompletionLatch, CompletionSource, SingleFire};

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one verified operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Verification state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationState {
    /// `start` has not been called.
    NotStarted = 0,
    /// The begin handler has been invoked.
    Started = 1,
    /// The callback fired inside the begin handler's call frame.
    CompletedSynchronously = 2,
    /// The callback fired outside the begin handler's call frame.
    CompletedAsynchronously = 3,
    /// The validated callback has been delivered.
    Dispatched = 4,
    /// The begin handler failed on its own; no callback is expected.
    HandlerFailed = 5,
    /// A protocol violation was detected.
    Faulted = 6,
}

impl OperationState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Started,
            2 => Self::CompletedSynchronously,
            3 => Self::CompletedAsynchronously,
            4 => Self::Dispatched,
            5 => Self::HandlerFailed,
            _ => Self::Faulted,
        }
    }

    /// Returns `true` for states no further transition leaves, except to
    /// `Faulted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Dispatched | Self::HandlerFailed | Self::Faulted)
    }
}

/// Whether an operation completed inside or outside the begin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompletionMode {
    /// Not known yet.
    #[default]
    Unknown,
    /// Within the begin handler's call frame, on its thread.
    Synchronous,
    /// Anywhere else.
    Asynchronous,
}

/// How an operation settled when it did not fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Settled {
    /// The callback was validated and delivered.
    Dispatched(CompletionMode),
    /// The begin handler failed without a protocol violation.
    HandlerFailed,
}

/// Final outcome of an operation: how it settled, or its first fault.
pub type Outcome = Result<Settled, VerifierFault>;

/// Point-in-time view of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Operation identity.
    pub id: OperationId,
    /// Current state.
    pub state: OperationState,
    /// Mode claimed by the token the begin handler returned.
    pub expected: CompletionMode,
    /// Mode in which the callback actually fired.
    pub observed: CompletionMode,
    /// Number of callback invocations seen.
    pub invocations: usize,
    /// First fault recorded, if any.
    pub fault: Option<VerifierFault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotCalled,
    Running(ThreadId),
    Returned,
    Threw,
}

/// What the begin call frame and the callback have seen of each other.
struct Frame {
    phase: Phase,
    expected: CompletionMode,
    observed: CompletionMode,
    /// Token the callback received, if it fired.
    delivered: Option<ResultRef>,
    /// Token the begin handler returned, once it has.
    returned: Option<ResultRef>,
    /// Mode of a dispatched callback still waiting on the return checks.
    dispatched: Option<CompletionMode>,
    /// The begin handler returned a token that passed every check.
    return_checked: bool,
}

struct Started {
    owner: ContextId,
    state: AsyncState,
    callback: CompletionCallback,
}

struct Inner {
    id: OperationId,
    host: Arc<dyn HostContext>,
    sink: Arc<dyn FaultSink>,
    state: AtomicU8,
    frame: Mutex<Frame>,
    started: OnceLock<Started>,
    /// Claimed by the first callback invocation.
    delivery: Claim,
    invocations: AtomicUsize,
    fault: OnceLock<VerifierFault>,
    outcome: CompletionSource<Outcome>,
    latch_release: OnceLock<SingleFire>,
}

/// Verifier wrapping a single begin/callback invocation.
///
/// Cloning yields another handle to the same operation.
#[derive(Clone)]
pub struct OperationVerifier {
    inner: Arc<Inner>,
}

impl OperationVerifier {
    /// Creates a verifier for one operation running under `host`.
    #[must_use]
    pub fn new(host: Arc<dyn HostContext>, sink: Arc<dyn FaultSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                host,
                sink,
                state: AtomicU8::new(OperationState::NotStarted as u8),
                frame: Mutex::new(Frame {
                    phase: Phase::NotCalled,
                    expected: CompletionMode::Unknown,
                    observed: CompletionMode::Unknown,
                    delivered: None,
                    returned: None,
                    dispatched: None,
                    return_checked: false,
                }),
                started: OnceLock::new(),
                delivery: Claim::unclaimed(),
                invocations: AtomicUsize::new(0),
                fault: OnceLock::new(),
                outcome: CompletionSource::new(),
                latch_release: OnceLock::new(),
            }),
        }
    }

    /// Registers the operation with `latch`.
    ///
    /// The latch must already account for this operation; it is marked
    /// completed once when the operation settles or faults.
    ///
    /// # Panics
    ///
    /// Panics if a latch is already registered or the operation has started.
    #[must_use]
    pub fn with_latch(self, latch: Arc<CompletionLatch>) -> Self {
        assert_eq!(
            self.state(),
            OperationState::NotStarted,
            "latch registered after the operation started"
        );
        let release = SingleFire::new(Box::new(move || {
            latch.mark_completed();
        }) as Box<dyn FnOnce() + Send>);
        assert!(
            self.inner.latch_release.set(release).is_ok(),
            "operation already registered with a latch"
        );
        self
    }

    /// Returns the operation id.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        self.inner.state()
    }

    /// Returns the first recorded fault.
    #[must_use]
    pub fn fault(&self) -> Option<&VerifierFault> {
        self.inner.fault.get()
    }

    /// Returns how many times the callback has been invoked.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.inner.invocations.load(Ordering::Acquire)
    }

    /// Returns the operation's outcome, set once it settles or faults.
    #[must_use]
    pub fn outcome(&self) -> Completion<Outcome> {
        self.inner.outcome.completion()
    }

    /// Returns a point-in-time view of the operation.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        let (expected, observed) = {
            let frame = self.inner.frame.lock();
            (frame.expected, frame.observed)
        };
        OperationSnapshot {
            id: self.inner.id,
            state: self.state(),
            expected,
            observed,
            invocations: self.invocation_count(),
            fault: self.fault().cloned(),
        }
    }

    /// Starts the operation by calling `handler`.
    ///
    /// The handler receives an instrumented callback and `state`. Once the
    /// callback has been validated, `callback` is invoked with the token.
    ///
    /// Returns the token the handler produced, or the error that ended the
    /// begin call: a fault detected at start or on return, or the handler's
    /// own failure.
    ///
    /// # Panics
    ///
    /// Panics if the operation was already started.
    pub fn start<H, C>(
        &self,
        handler: Option<H>,
        callback: C,
        state: AsyncState,
    ) -> Result<ResultRef, BeginError>
    where
        H: FnOnce(AsyncCallback, AsyncState) -> BeginResult,
        C: Fn(ResultRef) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        assert_eq!(
            inner.state(),
            OperationState::NotStarted,
            "operation {} started twice",
            inner.id
        );

        let Some(handler) = handler else {
            return Err(inner.raise(ErrorCode::BeginHandlerDelegateWasNull, None).into());
        };
        let Some(owner) = inner.host.context_id() else {
            return Err(inner
                .raise(ErrorCode::HttpApplicationInstanceWasNull, None)
                .into());
        };

        let started = Started {
            owner,
            state: state.clone(),
            callback: Arc::new(callback),
        };
        if inner.started.set(started).is_err() {
            panic!("operation {} started twice", inner.id);
        }
        inner.frame.lock().phase = Phase::Running(thread::current().id());
        inner.transition(OperationState::Started);

        let instrumented: AsyncCallback = {
            let inner = Arc::clone(&self.inner);
            Arc::new(move |result: Option<ResultRef>| inner.on_callback(result))
        };

        let returned = handler(instrumented, state);
        inner.on_begin_returned(returned)
    }

    /// Reports a violation on this operation.
    ///
    /// Moves the operation to `Faulted`, records the fault if it is the
    /// first, reports it to the sink and returns it.
    pub fn raise(&self, code: ErrorCode, detail: Option<&str>) -> VerifierFault {
        self.inner.raise(code, detail)
    }
}

impl Inner {
    fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves to `to` unless the operation already faulted.
    fn transition(&self, to: OperationState) -> bool {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != OperationState::Faulted as u8).then_some(to as u8)
            });
        match result {
            Ok(from) => {
                tracing::trace!(
                    operation = %self.id,
                    from = ?OperationState::from_u8(from),
                    to = ?to,
                    "operation state transition"
                );
                true
            }
            Err(_) => {
                tracing::trace!(operation = %self.id, to = ?to, "transition ignored, operation faulted");
                false
            }
        }
    }

    fn raise(&self, code: ErrorCode, detail: Option<&str>) -> VerifierFault {
        let fault = match detail {
            Some(detail) => {
                VerifierFault::with_message(code, format!("{}: {detail}", code.description()))
            }
            None => VerifierFault::new(code),
        };

        let from = self
            .state
            .swap(OperationState::Faulted as u8, Ordering::AcqRel);
        tracing::trace!(
            operation = %self.id,
            from = ?OperationState::from_u8(from),
            code = %code,
            "operation faulted"
        );

        if self.fault.set(fault.clone()).is_err() {
            tracing::debug!(operation = %self.id, code = %code, "additional fault after first");
        }
        self.outcome.try_complete(Err(fault.clone()));
        self.release_latch();
        self.sink.report(&fault, Some(self.id));
        fault
    }

    /// Completes the outcome unless the operation already faulted.
    fn settle(&self, settled: Settled) {
        if self.state() == OperationState::Faulted {
            return;
        }
        if self.outcome.try_complete(Ok(settled)) {
            tracing::trace!(operation = %self.id, ?settled, "operation settled");
        }
        self.release_latch();
    }

    fn release_latch(&self) {
        if let Some(release) = self.latch_release.get() {
            release.release();
        }
    }

    fn started(&self) -> &Started {
        match self.started.get() {
            Some(started) => started,
            None => unreachable!("callback issued before the operation started"),
        }
    }

    fn on_callback(&self, result: Option<ResultRef>) {
        let invocation = self.invocations.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.delivery.try_fire() {
            self.raise(
                ErrorCode::AsyncCallbackInvokedMultipleTimes,
                Some(&format!("invocation #{invocation}")),
            );
            return;
        }

        let started = self.started();
        let (mode, returned) = {
            let mut frame = self.frame.lock();
            let phase = frame.phase;
            let mode = match phase {
                Phase::Running(thread) if thread == thread::current().id() => {
                    CompletionMode::Synchronous
                }
                Phase::Threw => {
                    drop(frame);
                    self.raise(
                        ErrorCode::BeginHandlerThrewThenAsyncCallbackInvokedAsynchronously,
                        None,
                    );
                    return;
                }
                _ => CompletionMode::Asynchronous,
            };
            frame.observed = mode;
            frame.delivered.clone_from(&result);
            (mode, frame.returned.clone())
        };
        tracing::trace!(operation = %self.id, ?mode, "callback invoked");

        let Some(result) = result else {
            self.raise(ErrorCode::AsyncCallbackInvokedWithNullParameter, None);
            return;
        };

        if let Some(returned) = &returned {
            if !same_result(returned, &result) {
                self.raise(ErrorCode::AsyncCallbackInvokedWithUnexpectedAsyncResultInstance, None);
                return;
            }
        }
        if !same_state(&result.async_state(), &started.state) {
            self.raise(ErrorCode::AsyncCallbackInvokedWithUnexpectedAsyncResultAsyncState, None);
            return;
        }
        if !result.is_completed() {
            self.raise(ErrorCode::AsyncCallbackGivenAsyncResultWhichWasNotCompleted, None);
            return;
        }
        match (mode, result.completed_synchronously()) {
            (CompletionMode::Synchronous, false) => {
                self.raise(
                    ErrorCode::AsyncCallbackInvokedSynchronouslyButAsyncResultWasNotMarkedCompletedSynchronously,
                    None,
                );
                return;
            }
            (CompletionMode::Asynchronous, true) => {
                self.raise(
                    ErrorCode::AsyncCallbackInvokedAsynchronouslyButAsyncResultWasMarkedCompletedSynchronously,
                    None,
                );
                return;
            }
            _ => {}
        }
        if let Some(current) = self.host.context_id() {
            if current != started.owner {
                self.raise(
                    ErrorCode::AsyncCallbackCalledAfterHttpApplicationReassigned,
                    Some(&format!("started under {}, now {current}", started.owner)),
                );
                return;
            }
        }

        let completed = match mode {
            CompletionMode::Synchronous => OperationState::CompletedSynchronously,
            _ => OperationState::CompletedAsynchronously,
        };
        if !self.transition(completed) {
            tracing::debug!(operation = %self.id, "callback not dispatched, operation faulted");
            return;
        }
        (started.callback)(result);
        if !self.transition(OperationState::Dispatched) {
            return;
        }
        let settle_now = {
            let mut frame = self.frame.lock();
            frame.dispatched = Some(mode);
            frame.return_checked
        };
        if settle_now {
            self.settle(Settled::Dispatched(mode));
        } else {
            tracing::trace!(operation = %self.id, "dispatched, waiting for begin return checks");
        }
    }

    fn on_begin_returned(&self, returned: BeginResult) -> Result<ResultRef, BeginError> {
        let (observed, delivered) = {
            let mut frame = self.frame.lock();
            frame.phase = if returned.is_err() {
                Phase::Threw
            } else {
                Phase::Returned
            };
            if let Ok(Some(token)) = &returned {
                frame.returned = Some(Arc::clone(token));
                frame.expected = if token.completed_synchronously() {
                    CompletionMode::Synchronous
                } else {
                    CompletionMode::Asynchronous
                };
            }
            (frame.observed, frame.delivered.clone())
        };
        tracing::trace!(operation = %self.id, ok = returned.is_ok(), ?observed, "begin handler returned");

        let token = match returned {
            Err(error) => {
                let code = match observed {
                    CompletionMode::Synchronous => {
                        ErrorCode::AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew
                    }
                    CompletionMode::Asynchronous => {
                        ErrorCode::AsyncCallbackInvokedAsynchronouslyThenBeginHandlerThrew
                    }
                    CompletionMode::Unknown => {
                        if self.transition(OperationState::HandlerFailed) {
                            self.settle(Settled::HandlerFailed);
                        }
                        return Err(BeginError::Handler(error));
                    }
                };
                return Err(self.raise(code, Some(&error.to_string())).into());
            }
            Ok(None) => return Err(self.raise(ErrorCode::BeginHandlerReturnedNull, None).into()),
            Ok(Some(token)) => token,
        };

        if let Some(delivered) = &delivered {
            if !same_result(delivered, &token) {
                return Err(self
                    .raise(ErrorCode::BeginHandlerReturnedUnexpectedAsyncResultInstance, None)
                    .into());
            }
        }
        if !same_state(&token.async_state(), &self.started().state) {
            return Err(self
                .raise(ErrorCode::BeginHandlerReturnedUnexpectedAsyncResultAsyncState, None)
                .into());
        }
        if token.completed_synchronously() {
            if !token.is_completed() {
                return Err(self
                    .raise(
                        ErrorCode::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButWhichWasNotCompleted,
                        None,
                    )
                    .into());
            }
            if observed == CompletionMode::Unknown {
                return Err(self
                    .raise(
                        ErrorCode::BeginHandlerReturnedAsyncResultMarkedCompletedSynchronouslyButAsyncCallbackNeverCalled,
                        None,
                    )
                    .into());
            }
        }

        let dispatched = {
            let mut frame = self.frame.lock();
            frame.return_checked = true;
            frame.dispatched
        };
        if let Some(mode) = dispatched {
            self.settle(Settled::Dispatched(mode));
        }
        Ok(token)
    }
}

impl fmt::Debug for OperationVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationVerifier")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("invocations", &self.invocation_count())
            .field("fault", &self.fault())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use crate::verifier::host::RequestHost;
    use crate::verifier::result::ResultToken;
    use crate::verifier::sink::RecordingSink;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn fixture() -> (Arc<RecordingSink>, OperationVerifier) {
        let sink = Arc::new(RecordingSink::new(16));
        let op = OperationVerifier::new(Arc::new(RequestHost::new()), sink.clone());
        (sink, op)
    }

    #[test]
    fn synchronous_completion_dispatches() {
        init_test("synchronous_completion_dispatches");
        let (sink, op) = fixture();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);

        let token = op
            .start(
                Some(|cb: AsyncCallback, state: AsyncState| -> BeginResult {
                    let token: ResultRef = ResultToken::completed(state, true);
                    cb(Some(Arc::clone(&token)));
                    Ok(Some(token))
                }),
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .expect("begin should succeed");

        assert!(token.is_completed());
        assert_eq!(op.state(), OperationState::Dispatched);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        let snap = op.snapshot();
        assert_eq!(snap.expected, CompletionMode::Synchronous);
        assert_eq!(snap.observed, CompletionMode::Synchronous);
        assert_eq!(snap.invocations, 1);
        assert_eq!(
            op.outcome().get(),
            Some(&Ok(Settled::Dispatched(CompletionMode::Synchronous)))
        );
        assert!(sink.is_empty());
        crate::test_complete!("synchronous_completion_dispatches");
    }

    #[test]
    fn handler_failure_without_callback_propagates() {
        init_test("handler_failure_without_callback_propagates");
        let (sink, op) = fixture();
        let Err(err) = op.start(
            Some(|_: AsyncCallback, _: AsyncState| -> BeginResult { Err("io failure".into()) }),
            |_| {},
            None,
        ) else {
            panic!("handler failure should propagate");
        };
        assert!(matches!(err, BeginError::Handler(_)));
        assert_eq!(op.state(), OperationState::HandlerFailed);
        assert_eq!(op.outcome().get(), Some(&Ok(Settled::HandlerFailed)));
        assert!(sink.is_empty());
        crate::test_complete!("handler_failure_without_callback_propagates");
    }

    #[test]
    fn sync_callback_then_throw_settles_as_fault() {
        init_test("sync_callback_then_throw_settles_as_fault");
        let latch = Arc::new(CompletionLatch::new(1));
        let (sink, op) = fixture();
        let op = op.with_latch(Arc::clone(&latch));
        let result = op.start(
            Some(|cb: AsyncCallback, state: AsyncState| -> BeginResult {
                cb(Some(ResultToken::completed(state, true) as ResultRef));
                Err("failed after completing".into())
            }),
            |_| {},
            None,
        );
        assert!(matches!(result, Err(BeginError::Fault(_))));
        assert_eq!(op.state(), OperationState::Faulted);
        assert_eq!(
            op.outcome()
                .get()
                .map(|o| o.as_ref().map_err(VerifierFault::code).copied()),
            Some(Err(ErrorCode::AsyncCallbackInvokedSynchronouslyThenBeginHandlerThrew))
        );
        assert!(latch.is_completed());
        assert_eq!(sink.len(), 1);
        crate::test_complete!("sync_callback_then_throw_settles_as_fault");
    }

    #[test]
    fn outcome_waits_for_return_checks() {
        init_test("outcome_waits_for_return_checks");
        let latch = Arc::new(CompletionLatch::new(1));
        let (_sink, op) = fixture();
        let op = op.with_latch(Arc::clone(&latch));
        let observer = op.clone();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_handler = Arc::clone(&seen);
        op.start(
            Some(move |cb: AsyncCallback, state: AsyncState| -> BeginResult {
                let token: ResultRef = ResultToken::completed(state, true);
                cb(Some(Arc::clone(&token)));
                *seen_in_handler.lock() = Some((
                    observer.state(),
                    observer.outcome().is_completed(),
                    latch.is_completed(),
                ));
                Ok(Some(token))
            }),
            |_| {},
            None,
        )
        .expect("begin should succeed");

        assert_eq!(*seen.lock(), Some((OperationState::Dispatched, false, false)));
        assert_eq!(
            op.outcome().get(),
            Some(&Ok(Settled::Dispatched(CompletionMode::Synchronous)))
        );
        crate::test_complete!("outcome_waits_for_return_checks");
    }

    #[test]
    fn latch_released_once_even_with_repeated_faults() {
        init_test("latch_released_once_even_with_repeated_faults");
        let latch = Arc::new(CompletionLatch::new(2));
        let (sink, op) = fixture();
        let op = op.with_latch(Arc::clone(&latch));
        let keep: Arc<Mutex<Option<AsyncCallback>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&keep);

        op.start(
            Some(move |cb: AsyncCallback, state: AsyncState| -> BeginResult {
                *slot.lock() = Some(cb);
                Ok(Some(ResultToken::new(state) as ResultRef))
            }),
            |_| {},
            None,
        )
        .expect("begin should succeed");
        assert_eq!(latch.pending(), 2);

        let cb = keep.lock().take().expect("callback captured");
        cb(None);
        cb(None);
        assert_eq!(latch.pending(), 1);
        assert_eq!(
            sink.codes(),
            vec![
                ErrorCode::AsyncCallbackInvokedWithNullParameter,
                ErrorCode::AsyncCallbackInvokedMultipleTimes
            ]
        );
        assert_eq!(
            op.fault().map(VerifierFault::code),
            Some(ErrorCode::AsyncCallbackInvokedWithNullParameter)
        );
        crate::test_complete!("latch_released_once_even_with_repeated_faults");
    }
}
