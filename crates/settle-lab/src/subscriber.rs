#![forbid(unsafe_code)]

//! `tracing` subscriber bootstrap for tests and lab hosts.
//!
//! The filter comes from `RUST_LOG` and defaults to `warn`, so discarded
//! unhandled rejections show up without further setup. Output goes through
//! the test writer and is captured per test by `cargo test`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::LabError;

const DEFAULT_FILTER: &str = "warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable global subscriber.
///
/// Fails if a global subscriber is already set, e.g. by another test in the
/// same binary.
pub fn init_tracing() -> Result<(), LabError> {
    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()?;
    Ok(())
}

/// Install a global subscriber emitting one JSON object per event.
pub fn init_json_tracing() -> Result<(), LabError> {
    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer().json().with_test_writer())
        .try_init()?;
    Ok(())
}
