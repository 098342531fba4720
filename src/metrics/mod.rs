//! Metric registry, on-demand collectors and exposition encoding.

mod collector;
mod encoder;
mod registry;

pub use collector::{ProcessStatsCollector, StandardCollector};
pub use encoder::{
    encode, resolve_content_type, ExpositionFormat, OPENMETRICS_TEXT_CONTENT_TYPE,
    PROMETHEUS_TEXT_CONTENT_TYPE,
};
pub use registry::{CollectionError, MetricFamily, MetricRegistry, Snapshot};
