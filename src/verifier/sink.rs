//! Diagnostic boundary for reported faults.
//!
//! Every fault the verifier detects is handed to a [`FaultSink`]. The sink
//! decides what "surfacing" means: log it, panic on it, or keep it for a
//! test to inspect.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::operation::OperationId;
use crate::error::{ErrorCode, VerifierFault};

/// Receives faults as they are detected.
///
/// Called on whatever thread detected the fault, possibly a callback
/// thread. Implementations must not block for long.
pub trait FaultSink: Send + Sync {
    /// Reports a fault. `operation` is `None` for faults not tied to an
    /// operation, such as sync-context misuse.
    fn report(&self, fault: &VerifierFault, operation: Option<OperationId>);
}

impl<F> FaultSink for F
where
    F: Fn(&VerifierFault, Option<OperationId>) + Send + Sync,
{
    fn report(&self, fault: &VerifierFault, operation: Option<OperationId>) {
        self(fault, operation);
    }
}

/// Logs faults at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FaultSink for TracingSink {
    fn report(&self, fault: &VerifierFault, operation: Option<OperationId>) {
        tracing::error!(
            code = %fault.code(),
            category = ?fault.category(),
            message = fault.message(),
            operation_id = operation.map(OperationId::as_u64),
            "async protocol violation"
        );
    }
}

/// Panics on the first fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicSink;

impl FaultSink for PanicSink {
    fn report(&self, fault: &VerifierFault, operation: Option<OperationId>) {
        match operation {
            Some(id) => panic!("async protocol violation in {id}: {fault}"),
            None => panic!("async protocol violation: {fault}"),
        }
    }
}

/// A fault as kept by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultRecord {
    /// The reported fault.
    pub fault: VerifierFault,
    /// The operation it was raised for, if any.
    pub operation: Option<OperationId>,
}

/// Keeps the most recent faults in a bounded buffer.
///
/// When full, the oldest record is dropped and counted.
pub struct RecordingSink {
    limit: usize,
    records: Mutex<VecDeque<FaultRecord>>,
    dropped: AtomicUsize,
}

impl RecordingSink {
    /// Creates a sink keeping at most `limit` records.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            records: Mutex::new(VecDeque::with_capacity(limit.min(64))),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Returns a copy of the kept records, oldest first.
    #[must_use]
    pub fn faults(&self) -> Vec<FaultRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Returns the codes of the kept records, oldest first.
    #[must_use]
    pub fn codes(&self) -> Vec<ErrorCode> {
        self.records.lock().iter().map(|r| r.fault.code()).collect()
    }

    /// Returns the codes recorded for one operation.
    #[must_use]
    pub fn codes_for(&self, operation: OperationId) -> Vec<ErrorCode> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.operation == Some(operation))
            .map(|r| r.fault.code())
            .collect()
    }

    /// Returns the number of kept records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns how many records were evicted to respect the limit.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discards all records.
    pub fn clear(&self) {
        self.records.lock().clear();
        self.dropped.store(0, Ordering::Relaxed);
    }
}

impl FaultSink for RecordingSink {
    fn report(&self, fault: &VerifierFault, operation: Option<OperationId>) {
        tracing::debug!(code = %fault.code(), ?operation, "fault recorded");
        if self.limit == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.limit {
            records.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(FaultRecord {
            fault: fault.clone(),
            operation,
        });
    }
}

impl fmt::Debug for RecordingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSink")
            .field("limit", &self.limit)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::Arc;

    #[test]
    fn recording_sink_is_bounded() {
        init_test_logging();
        crate::test_phase!("recording_sink_is_bounded");
        let sink = RecordingSink::new(2);
        sink.report(
            &VerifierFault::new(ErrorCode::AsyncCallbackInvokedMultipleTimes),
            None,
        );
        sink.report(
            &VerifierFault::new(ErrorCode::BeginHandlerReturnedNull),
            None,
        );
        sink.report(
            &VerifierFault::new(ErrorCode::AsyncCallbackInvokedWithNullParameter),
            None,
        );
        assert_eq!(
            sink.codes(),
            vec![
                ErrorCode::BeginHandlerReturnedNull,
                ErrorCode::AsyncCallbackInvokedWithNullParameter
            ]
        );
        assert_eq!(sink.dropped(), 1);
        sink.clear();
        assert!(sink.is_empty());
        crate::test_complete!("recording_sink_is_bounded");
    }

    #[test]
    fn closure_sink() {
        init_test_logging();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let sink = move |_: &VerifierFault, _: Option<OperationId>| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        sink.report(&VerifierFault::new(ErrorCode::BeginHandlerDelegateWasNull), None);
        TracingSink.report(&VerifierFault::new(ErrorCode::BeginHandlerDelegateWasNull), None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "async protocol violation")]
    fn panic_sink_panics() {
        init_test_logging();
        PanicSink.report(&VerifierFault::new(ErrorCode::BeginHandlerReturnedNull), None);
    }
}
