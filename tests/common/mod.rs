#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use appverify::config::{FaultBehavior, VerifierConfig};
use appverify::verifier::{HostContext, RecordingSink, RequestHost, Verifier};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "APPVERIFY_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }
    None
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
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

/// An enabled verifier recording into a bounded sink, plus a fresh host.
pub struct Fixture {
    pub verifier: Verifier,
    pub host: Arc<RequestHost>,
}

impl Fixture {
    pub fn new() -> Self {
        let verifier = Verifier::new(
            VerifierConfig::default()
                .with_enabled(true)
                .with_behavior(FaultBehavior::Record)
                .with_record_limit(64),
        );
        Self {
            verifier,
            host: Arc::new(RequestHost::new()),
        }
    }

    pub fn host(&self) -> Arc<dyn HostContext> {
        self.host.clone()
    }

    pub fn recorder(&self) -> &RecordingSink {
        self.verifier
            .recorder()
            .expect("fixture verifier records faults")
    }
}
