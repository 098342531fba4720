//! Shared metric registry and point-in-time snapshots.
//!
//! [`MetricRegistry`] wraps a `prometheus_client` registry behind a shared lock so
//! that the scrape endpoint, the code that records metrics and any number of
//! servers can hold the same instance.

use crate::metrics::collector::StandardCollector;
use parking_lot::RwLock;
use prometheus_client::collector::Collector;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::{Metric, Registry, Unit};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// Process-wide default registry.
static GLOBAL_REGISTRY: LazyLock<MetricRegistry> = LazyLock::new(MetricRegistry::new);

/// Failure while walking the registry to build a snapshot.
#[derive(Debug, Error)]
#[error("failed to collect metrics from registry")]
pub struct CollectionError(#[from] std::fmt::Error);

/// Cheaply cloneable handle to a metric registry.
#[derive(Clone, Debug)]
pub struct MetricRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

#[derive(Debug)]
struct RegistryState {
    registry: Registry,
    /// Number of on-demand collectors registered through this handle.
    on_demand_collectors: usize,
    /// Whether a process-stats collector is already present.
    has_process_stats: bool,
}

impl MetricRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::from_registry(Registry::default())
    }

    /// Create a new registry whose metric names are prefixed with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::from_registry(Registry::with_prefix(prefix))
    }

    fn from_registry(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState {
                registry,
                on_demand_collectors: 0,
                has_process_stats: false,
            })),
        }
    }

    /// The process-wide default registry.
    pub fn global() -> Self {
        GLOBAL_REGISTRY.clone()
    }

    /// Whether this handle refers to the process-wide default registry.
    pub fn is_global(&self) -> bool {
        self.ptr_eq(&GLOBAL_REGISTRY)
    }

    /// Whether both handles refer to the same registry.
    pub fn ptr_eq(&self, other: &MetricRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register a metric under `name`.
    pub fn register(&self, name: impl Into<String>, help: impl Into<String>, metric: impl Metric) {
        self.inner.write().registry.register(name, help, metric);
    }

    /// Register a metric under `name` with a unit suffix.
    pub fn register_with_unit(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        unit: Unit,
        metric: impl Metric,
    ) {
        self.inner
            .write()
            .registry
            .register_with_unit(name, help, unit, metric);
    }

    /// Register a collector that is invoked on every scrape.
    pub fn register_collector(&self, collector: Box<dyn Collector>) {
        let mut state = self.inner.write();
        state.registry.register_collector(collector);
        state.on_demand_collectors += 1;
    }

    /// Register a batch of on-demand collectors.
    ///
    /// A process-stats collector is only ever registered once per registry;
    /// duplicates are skipped so that the exposition never repeats a family.
    /// Returns the number of collectors actually registered.
    pub fn register_on_demand_collectors(
        &self,
        collectors: impl IntoIterator<Item = StandardCollector>,
    ) -> usize {
        let mut state = self.inner.write();
        let mut registered = 0;

        for collector in collectors {
            if collector.is_process_stats() {
                if state.has_process_stats {
                    continue;
                }
                state.has_process_stats = true;
            }
            state.registry.register_collector(collector.into_collector());
            state.on_demand_collectors += 1;
            registered += 1;
        }

        registered
    }

    /// Number of on-demand collectors registered so far.
    pub fn on_demand_collector_count(&self) -> usize {
        self.inner.read().on_demand_collectors
    }

    /// Whether a process-stats collector has been registered.
    pub fn has_process_stats(&self) -> bool {
        self.inner.read().has_process_stats
    }

    /// Take a point-in-time snapshot of every registered metric.
    ///
    /// The registry is walked once under its read lock, so each family in the
    /// snapshot is internally consistent. Every call returns a fresh snapshot.
    pub fn collect_all(&self) -> Result<Snapshot, CollectionError> {
        let mut rendered = String::new();
        {
            let state = self.inner.read();
            encode(&mut rendered, &state.registry)?;
        }
        Ok(Snapshot::from_exposition(&rendered))
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One named group of samples, with its descriptor lines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricFamily {
    name: String,
    lines: Vec<String>,
}

impl MetricFamily {
    /// Family name as declared by its descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor and sample lines, without trailing newlines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Sample lines only.
    pub fn samples(&self) -> impl Iterator<Item = &str> {
        self.lines().filter(|line| !line.starts_with('#'))
    }
}

/// Immutable, ordered set of metric families taken at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    families: Vec<MetricFamily>,
}

impl Snapshot {
    /// Split OpenMetrics text into families.
    pub(crate) fn from_exposition(text: &str) -> Self {
        let mut families: Vec<MetricFamily> = Vec::new();

        for line in text.lines() {
            if line.is_empty() || line == "# EOF" {
                continue;
            }

            if let Some(name) = descriptor_name(line) {
                let starts_family = families.last().is_none_or(|family| family.name != name);
                if starts_family {
                    families.push(MetricFamily {
                        name: name.to_string(),
                        lines: Vec::new(),
                    });
                }
            }

            match families.last_mut() {
                Some(family) => family.lines.push(line.to_string()),
                // Samples always follow a descriptor; keep stray lines anyway.
                None => families.push(MetricFamily {
                    name: sample_name(line).to_string(),
                    lines: vec![line.to_string()],
                }),
            }
        }

        Self { families }
    }

    /// Families in registration order.
    pub fn families(&self) -> &[MetricFamily] {
        &self.families
    }

    /// Look up a family by name.
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|family| family.name == name)
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// Name declared by a `# HELP`, `# TYPE` or `# UNIT` line.
fn descriptor_name(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("# HELP ")
        .or_else(|| line.strip_prefix("# TYPE "))
        .or_else(|| line.strip_prefix("# UNIT "))?;
    rest.split_whitespace().next()
}

/// Metric name of a sample line.
pub(crate) fn sample_name(line: &str) -> &str {
    line.split(|c: char| c == '{' || c.is_whitespace())
        .next()
        .unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::collector::ProcessStatsCollector;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::gauge::Gauge;

    #[test]
    fn test_empty_registry_snapshot() {
        let registry = MetricRegistry::new();
        let snapshot = registry.collect_all().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_splits_families() {
        let registry = MetricRegistry::new();
        let requests = Counter::<u64>::default();
        let queue_depth = Gauge::<i64>::default();
        registry.register("requests", "Total requests", requests.clone());
        registry.register("queue_depth", "Items waiting", queue_depth.clone());

        requests.inc_by(3);
        queue_depth.set(7);

        let snapshot = registry.collect_all().unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.families()[0].name(), "requests");
        assert_eq!(snapshot.families()[1].name(), "queue_depth");

        let samples: Vec<_> = snapshot.family("requests").unwrap().samples().collect();
        assert_eq!(samples, vec!["requests_total 3"]);
        let samples: Vec<_> = snapshot.family("queue_depth").unwrap().samples().collect();
        assert_eq!(samples, vec!["queue_depth 7"]);
    }

    #[test]
    fn test_labelled_family_stays_together() {
        let registry = MetricRegistry::new();
        let family = Family::<Vec<(String, String)>, Counter>::default();
        registry.register("hits", "Hits by route", family.clone());

        for route in ["a", "b", "c"] {
            family
                .get_or_create(&vec![("route".to_string(), route.to_string())])
                .inc();
        }

        let snapshot = registry.collect_all().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.families()[0].samples().count(), 3);
    }

    #[test]
    fn test_snapshots_are_independent() {
        let registry = MetricRegistry::new();
        let counter = Counter::<u64>::default();
        registry.register("events", "Events seen", counter.clone());

        let before = registry.collect_all().unwrap();
        counter.inc();
        let after = registry.collect_all().unwrap();

        assert_ne!(before, after);
        assert!(before.family("events").unwrap().samples().any(|s| s == "events_total 0"));
    }

    #[test]
    fn test_process_stats_registered_once() {
        let registry = MetricRegistry::new();
        let first = registry.register_on_demand_collectors([StandardCollector::ProcessStats(
            ProcessStatsCollector::new(),
        )]);
        let second = registry.register_on_demand_collectors([StandardCollector::ProcessStats(
            ProcessStatsCollector::new(),
        )]);

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(registry.on_demand_collector_count(), 1);
        assert!(registry.has_process_stats());
    }

    #[test]
    fn test_global_identity() {
        assert!(MetricRegistry::global().is_global());
        assert!(!MetricRegistry::new().is_global());

        let registry = MetricRegistry::new();
        assert!(registry.ptr_eq(&registry.clone()));
    }
}
