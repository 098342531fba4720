//! Per-request scrape handling.

use crate::metrics::{encode, resolve_content_type, CollectionError, ExpositionFormat, MetricRegistry};
use crate::util::ScrapeId;
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

/// Failure while producing a scrape body.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("failed to encode metrics: {0}")]
    Encoding(#[from] std::io::Error),
}

/// Turns one inbound request into one scrape response.
///
/// Stateless across requests; clones share the registry handle.
#[derive(Clone, Debug)]
pub struct ScrapeHandler {
    registry: MetricRegistry,
    /// Normalized base path, e.g. `/metrics`, or empty to match everything.
    base_path: Arc<str>,
}

impl ScrapeHandler {
    pub fn new(registry: MetricRegistry, path: &str) -> Self {
        Self {
            registry,
            base_path: normalize_base_path(path).into(),
        }
    }

    /// Base path requests are served under.
    pub fn base_path(&self) -> &str {
        if self.base_path.is_empty() { "/" } else { &self.base_path[..] }
    }

    /// Whether `path` is the base path or lies beneath it.
    pub fn matches(&self, path: &str) -> bool {
        if self.base_path.is_empty() {
            return true;
        }
        match path.strip_prefix(&*self.base_path) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Handle a request of any method.
    pub fn handle<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        let scrape_id = ScrapeId::next();
        let path = req.uri().path();

        if !self.matches(path) {
            debug!(scrape_id = %scrape_id, path = %path, "request outside metrics path");
            return plain_response(StatusCode::NOT_FOUND, "Not found\n");
        }

        let accept = req.headers().get(ACCEPT).and_then(|value| value.to_str().ok());
        let start = Instant::now();

        match self.scrape(accept) {
            Ok((format, body)) => {
                debug!(
                    scrape_id = %scrape_id,
                    method = %req.method(),
                    content_type = format.content_type(),
                    bytes = body.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "scrape served"
                );
                let mut response = Response::new(Full::new(body));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
                response
            }
            Err(e) => {
                error!(scrape_id = %scrape_id, error = %e, "scrape failed");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to collect metrics\n")
            }
        }
    }

    /// Negotiate a format, snapshot the registry and encode it.
    pub fn scrape(&self, accept: Option<&str>) -> Result<(ExpositionFormat, Bytes), ScrapeError> {
        let format = resolve_content_type(accept);
        let snapshot = self.registry.collect_all()?;

        let mut writer = BytesMut::new().writer();
        encode(&snapshot, format, &mut writer)?;

        Ok((format, writer.into_inner().freeze()))
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// `metrics/`, `/metrics` and `/metrics/` all become `/metrics`.
fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{StandardCollector, OPENMETRICS_TEXT_CONTENT_TYPE, PROMETHEUS_TEXT_CONTENT_TYPE};
    use http_body_util::BodyExt;
    use hyper::Method;
    use prometheus_client::collector::Collector;
    use prometheus_client::encoding::DescriptorEncoder;
    use prometheus_client::metrics::counter::Counter;

    #[derive(Debug)]
    struct BrokenCollector;

    impl Collector for BrokenCollector {
        fn encode(&self, _encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
            Err(std::fmt::Error)
        }
    }

    fn request(method: Method, path: &str, accept: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        builder.body(()).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path("metrics/"), "/metrics");
        assert_eq!(normalize_base_path("/metrics"), "/metrics");
        assert_eq!(normalize_base_path("/a/b/"), "/a/b");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path(""), "");
    }

    #[test]
    fn test_matches() {
        let handler = ScrapeHandler::new(MetricRegistry::new(), "metrics/");
        assert_eq!(handler.base_path(), "/metrics");
        assert!(handler.matches("/metrics"));
        assert!(handler.matches("/metrics/"));
        assert!(handler.matches("/metrics/anything/below"));
        assert!(!handler.matches("/metricsfoo"));
        assert!(!handler.matches("/"));
        assert!(!handler.matches("/health"));

        let catch_all = ScrapeHandler::new(MetricRegistry::new(), "/");
        assert_eq!(catch_all.base_path(), "/");
        assert!(catch_all.matches("/anything"));
    }

    #[tokio::test]
    async fn test_scrape_plain_text() {
        let registry = MetricRegistry::new();
        let counter = Counter::<u64>::default();
        counter.inc_by(2);
        registry.register("widgets", "Widgets built", counter);
        let handler = ScrapeHandler::new(registry, "metrics/");

        let response = handler.handle(&request(Method::GET, "/metrics", Some("text/plain")));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], PROMETHEUS_TEXT_CONTENT_TYPE);
        assert!(body_string(response).await.contains("widgets_total 2\n"));
    }

    #[tokio::test]
    async fn test_any_method_is_served() {
        let handler = ScrapeHandler::new(MetricRegistry::new(), "metrics/");
        for method in [Method::POST, Method::HEAD, Method::DELETE] {
            let response = handler.handle(&request(method, "/metrics/x", None));
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_openmetrics_negotiation() {
        let handler = ScrapeHandler::new(MetricRegistry::new(), "metrics/");
        let response = handler.handle(&request(
            Method::GET,
            "/metrics",
            Some("application/openmetrics-text; version=1.0.0"),
        ));
        assert_eq!(response.headers()[CONTENT_TYPE], OPENMETRICS_TEXT_CONTENT_TYPE);
        assert_eq!(body_string(response).await, "# EOF\n");
    }

    #[tokio::test]
    async fn test_outside_base_path() {
        let handler = ScrapeHandler::new(MetricRegistry::new(), "metrics/");
        let response = handler.handle(&request(Method::GET, "/other", None));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_collection_failure_is_server_error() {
        let registry = MetricRegistry::new();
        registry.register_on_demand_collectors([StandardCollector::Custom(Box::new(BrokenCollector))]);
        let handler = ScrapeHandler::new(registry, "metrics/");

        assert!(matches!(handler.scrape(None), Err(ScrapeError::Collection(_))));

        let response = handler.handle(&request(Method::GET, "/metrics", None));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
