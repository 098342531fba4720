//! Utility functions and helpers.

mod logging;
mod scrape_id;
mod shutdown;

pub use logging::init_logging;
pub use scrape_id::ScrapeId;
pub use shutdown::ShutdownSignal;
