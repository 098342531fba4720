//! Identifiers for correlating scrape log lines.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for scrape IDs.
static SCRAPE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Process-unique scrape identifier, formatted as `scrape-{counter}` with the
/// counter zero-padded to 16 hex digits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScrapeId(u64);

impl ScrapeId {
    /// Allocate the next ID.
    pub fn next() -> Self {
        Self(SCRAPE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScrapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scrape-{:016x}", self.0)
    }
}
