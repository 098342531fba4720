//! Logging initialization.

use crate::config::LogFormat;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_DIRECTIVE: &str = "info";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. A `level` that does not parse as a
/// filter directive falls back to `info` rather than silencing everything.
pub fn init_logging(level: &str, format: &LogFormat) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let registry = tracing_subscriber::registry().with(scrape_filter(env.as_deref(), level));

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

fn scrape_filter(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(FALLBACK_DIRECTIVE))
}
