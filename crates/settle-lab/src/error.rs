#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors raised by the lab harness itself.
#[derive(Debug, Error)]
pub enum LabError {
    #[error("failed to serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to install tracing subscriber: {0}")]
    TracingInit(#[from] tracing_subscriber::util::TryInitError),
}
