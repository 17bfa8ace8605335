//! Begin/callback protocol verification.
//!
//! A [`Verifier`] hands out [`OperationVerifier`]s and [`SyncContext`]s that
//! share one [`FaultSink`], and wraps begin handlers so that every call goes
//! through a fresh operation verifier. With verification disabled the
//! wrapper is a plain passthrough.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use appverify::config::{FaultBehavior, VerifierConfig};
//! use appverify::verifier::{AsyncCallback, AsyncState, BeginResult, RequestHost, ResultRef, ResultToken, Verifier};
//!
//! let verifier = Verifier::new(
//!     VerifierConfig::default()
//!         .with_enabled(true)
//!         .with_behavior(FaultBehavior::Record),
//! );
//! let begin = verifier.wrap_begin(
//!     Arc::new(RequestHost::new()),
//!     Some(|cb: AsyncCallback, state: AsyncState| -> BeginResult {
//!         let token: ResultRef = ResultToken::completed(state, true);
//!         cb(Some(token.clone()));
//!         cb(Some(token.clone()));
//!         Ok(Some(token))
//!     }),
//! );
//! let call = begin.call(|_| {}, None);
//! assert!(call.result.is_ok());
//! assert_eq!(verifier.recorder().map(|r| r.len()), Some(1));
//! ```

pub mod host;
pub mod operation;
pub mod result;
pub mod sink;
pub mod sync_context;

use std::fmt;
use std::sync::Arc;

pub use host::{ContextId, ContextLock, HostContext, RequestHost};
pub use operation::{
    CompletionMode, OperationId, OperationSnapshot, OperationState, OperationVerifier, Outcome,
    Settled,
};
pub use result::{
    same_result, same_state, AsyncCallback, AsyncResult, AsyncState, BeginResult,
    CompletionCallback, ResultRef, ResultToken,
};
pub use sink::{FaultRecord, FaultSink, PanicSink, RecordingSink, TracingSink};
pub use sync_context::SyncContext;

use crate::config::{ConfigError, FaultBehavior, VerifierConfig};
use crate::error::BeginError;

/// Entry point tying configuration, sink and host together.
#[derive(Clone)]
pub struct Verifier {
    config: VerifierConfig,
    sink: Arc<dyn FaultSink>,
    recorder: Option<Arc<RecordingSink>>,
}

impl Verifier {
    /// Creates a verifier whose sink follows `config.behavior`.
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        let recorder = match config.behavior {
            FaultBehavior::Record => Some(Arc::new(RecordingSink::new(config.record_limit))),
            FaultBehavior::Log | FaultBehavior::Panic => None,
        };
        let sink: Arc<dyn FaultSink> = match (&recorder, config.behavior) {
            (Some(recorder), _) => recorder.clone(),
            (None, FaultBehavior::Panic) => Arc::new(PanicSink),
            (None, _) => Arc::new(TracingSink),
        };
        tracing::debug!(
            enabled = config.enabled,
            behavior = %config.behavior,
            "verifier created"
        );
        Self {
            config,
            sink,
            recorder,
        }
    }

    /// Creates a verifier reporting to a caller-supplied sink.
    #[must_use]
    pub fn with_sink(config: VerifierConfig, sink: Arc<dyn FaultSink>) -> Self {
        Self {
            config,
            sink,
            recorder: None,
        }
    }

    /// Creates a verifier from defaults and `APPVERIFY_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(VerifierConfig::from_env()?))
    }

    /// Returns `true` if begin handlers are instrumented.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Returns the sink faults are reported to.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn FaultSink> {
        &self.sink
    }

    /// Returns the recording sink when behavior is `Record`.
    #[must_use]
    pub fn recorder(&self) -> Option<&Arc<RecordingSink>> {
        self.recorder.as_ref()
    }

    /// Creates a verifier for one operation under `host`.
    #[must_use]
    pub fn operation(&self, host: Arc<dyn HostContext>) -> OperationVerifier {
        OperationVerifier::new(host, Arc::clone(&self.sink))
    }

    /// Creates a synchronization wrapper for `host`.
    #[must_use]
    pub fn sync_context(&self, host: Arc<dyn HostContext>) -> SyncContext {
        SyncContext::new(host, Arc::clone(&self.sink))
    }

    /// Wraps a begin handler.
    ///
    /// When enabled, each [`WrappedBegin::call`] runs under a fresh
    /// [`OperationVerifier`]. When disabled, calls go straight to `handler`.
    pub fn wrap_begin<H>(&self, host: Arc<dyn HostContext>, handler: Option<H>) -> WrappedBegin<H>
    where
        H: Fn(AsyncCallback, AsyncState) -> BeginResult + Send + Sync + 'static,
    {
        WrappedBegin {
            verifier: self.is_enabled().then(|| self.clone()),
            host,
            handler: handler.map(Arc::new),
        }
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("config", &self.config)
            .field("recording", &self.recorder.is_some())
            .finish()
    }
}

/// Result of one [`WrappedBegin::call`].
pub struct BeginCall {
    /// What the begin call returned.
    pub result: Result<ResultRef, BeginError>,
    /// The operation verifier, when instrumented.
    pub operation: Option<OperationVerifier>,
}

impl fmt::Debug for BeginCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeginCall")
            .field("ok", &self.result.is_ok())
            .field("operation", &self.operation)
            .finish()
    }
}

/// A begin handler as returned by [`Verifier::wrap_begin`].
pub struct WrappedBegin<H> {
    verifier: Option<Verifier>,
    host: Arc<dyn HostContext>,
    handler: Option<Arc<H>>,
}

impl<H> WrappedBegin<H>
where
    H: Fn(AsyncCallback, AsyncState) -> BeginResult + Send + Sync + 'static,
{
    /// Returns `true` if calls are verified.
    #[must_use]
    pub fn is_instrumented(&self) -> bool {
        self.verifier.is_some()
    }

    /// Invokes the begin handler.
    pub fn call<C>(&self, callback: C, state: AsyncState) -> BeginCall
    where
        C: Fn(ResultRef) + Send + Sync + 'static,
    {
        let Some(verifier) = &self.verifier else {
            return BeginCall {
                result: self.passthrough(callback, state),
                operation: None,
            };
        };

        let operation = verifier.operation(Arc::clone(&self.host));
        let handler = self.handler.as_ref().map(|h| {
            let h = Arc::clone(h);
            move |cb: AsyncCallback, st: AsyncState| h(cb, st)
        });
        let result = operation.start(handler, callback, state);
        BeginCall {
            result,
            operation: Some(operation),
        }
    }

    /// Uninstrumented call: the handler sees the caller's callback directly.
    fn passthrough<C>(&self, callback: C, state: AsyncState) -> Result<ResultRef, BeginError>
    where
        C: Fn(ResultRef) + Send + Sync + 'static,
    {
        let Some(handler) = &self.handler else {
            return Err(BeginError::Handler("no begin handler supplied".into()));
        };
        let forward: AsyncCallback = Arc::new(move |result: Option<ResultRef>| {
            if let Some(result) = result {
                callback(result);
            } else {
                tracing::trace!("passthrough callback invoked without a result token");
            }
        });
        match handler(forward, state) {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(BeginError::Handler(
                "begin handler returned no result token".into(),
            )),
            Err(error) => Err(BeginError::Handler(error)),
        }
    }
}

impl<H> fmt::Debug for WrappedBegin<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedBegin")
            .field("instrumented", &self.verifier.is_some())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
