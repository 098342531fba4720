//! The scrape endpoint: listener lifecycle, request handling and TLS.

mod error;
mod handler;
mod listener;
mod tls;

pub use error::MetricServerError;
pub use handler::{ScrapeError, ScrapeHandler};
pub use listener::{BindAddress, MetricServer, MetricServerBuilder, Scheme};
pub use tls::{TlsCertificate, TlsError};
