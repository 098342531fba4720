//! Errors surfaced by the metric server lifecycle.

use crate::server::tls::TlsError;
use thiserror::Error;

/// Errors that can occur while constructing, starting or serving.
#[derive(Debug, Error)]
pub enum MetricServerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("metric server is already running on {0}")]
    AlreadyRunning(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set up TLS: {0}")]
    Tls(#[from] TlsError),

    #[error("no tokio runtime available to run the metric server")]
    NoRuntime,
}
