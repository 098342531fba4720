//! promserve - an embeddable Prometheus scrape endpoint
//!
//! This crate serves an in-process metric registry over HTTP(S):
//! - Single-instance start/stop lifecycle with a reusable listener
//! - Content negotiation between the Prometheus text and OpenMetrics formats
//! - Optional TLS termination with rustls
//! - A process-wide default registry, or any caller-supplied one

pub mod config;
pub mod metrics;
pub mod server;
pub mod util;

pub use config::Config;
pub use metrics::MetricRegistry;
pub use server::{MetricServer, MetricServerError};
