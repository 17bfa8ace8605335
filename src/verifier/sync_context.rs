//! Enter/leave synchronization wrapper.
//!
//! [`SyncContext`] runs work inside the host context: `send` runs it on the
//! calling thread, `post` on a new thread. Both refuse to run once the
//! owning request has completed.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use super::host::HostContext;
use super::sink::FaultSink;
use crate::error::{ErrorCode, Result, VerifierFault};

/// Runs work inside a host context.
#[derive(Clone)]
pub struct SyncContext {
    host: Arc<dyn HostContext>,
    sink: Arc<dyn FaultSink>,
}

impl SyncContext {
    /// Creates a context wrapper reporting faults to `sink`.
    #[must_use]
    pub fn new(host: Arc<dyn HostContext>, sink: Arc<dyn FaultSink>) -> Self {
        Self { host, sink }
    }

    /// Runs `work` on the calling thread inside the context.
    ///
    /// # Errors
    ///
    /// Returns a `SyncContextSendOrPostCalledAfterRequestCompleted` fault,
    /// without running `work`, if the request has completed.
    pub fn send<R>(&self, work: impl FnOnce() -> R) -> Result<R> {
        self.ensure_request_active("send")?;
        let lock = self.host.enter();
        let out = work();
        lock.leave();
        Ok(out)
    }

    /// Runs `work` on a new thread inside the context.
    ///
    /// # Errors
    ///
    /// Returns a `SyncContextSendOrPostCalledAfterRequestCompleted` fault,
    /// without spawning, if the request has completed.
    pub fn post<F>(&self, work: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_request_active("post")?;
        let host = Arc::clone(&self.host);
        Ok(std::thread::spawn(move || {
            let _lock = host.enter();
            work();
        }))
    }

    fn ensure_request_active(&self, entry: &str) -> Result<()> {
        if !self.host.is_request_completed() {
            return Ok(());
        }
        let code = ErrorCode::SyncContextSendOrPostCalledAfterRequestCompleted;
        let fault = VerifierFault::with_message(
            code,
            format!("{} (via {entry})", code.description()),
        );
        self.sink.report(&fault, None);
        Err(fault)
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("context", &self.host.context_id())
            .field("request_completed", &self.host.is_request_completed())
            .finish()
    }
}
