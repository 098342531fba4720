//! On-demand collectors that are invoked at scrape time.

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::gauge::ConstGauge;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Process start time, captured the first time any collector asks for it.
static PROCESS_START: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

/// The set of collectors a server can register into a registry.
#[derive(Debug)]
pub enum StandardCollector {
    /// Basic process statistics.
    ProcessStats(ProcessStatsCollector),
    /// Any other `prometheus_client` collector.
    Custom(Box<dyn Collector>),
}

impl StandardCollector {
    /// The collectors registered when the caller does not name any.
    pub fn defaults() -> Vec<StandardCollector> {
        vec![StandardCollector::ProcessStats(ProcessStatsCollector::new())]
    }

    pub fn is_process_stats(&self) -> bool {
        matches!(self, StandardCollector::ProcessStats(_))
    }

    pub(crate) fn into_collector(self) -> Box<dyn Collector> {
        match self {
            StandardCollector::ProcessStats(collector) => Box::new(collector),
            StandardCollector::Custom(collector) => collector,
        }
    }
}

impl From<ProcessStatsCollector> for StandardCollector {
    fn from(collector: ProcessStatsCollector) -> Self {
        StandardCollector::ProcessStats(collector)
    }
}

/// Reports process-level statistics.
///
/// Values are constant for the life of the process, so consecutive scrapes
/// produce identical output.
#[derive(Clone, Debug)]
pub struct ProcessStatsCollector {
    start_time_seconds: f64,
}

impl ProcessStatsCollector {
    pub fn new() -> Self {
        let start_time_seconds = PROCESS_START
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self { start_time_seconds }
    }

    /// Process start time in seconds since the unix epoch.
    pub fn start_time_seconds(&self) -> f64 {
        self.start_time_seconds
    }
}

impl Default for ProcessStatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessStatsCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        let start_time = ConstGauge::new(self.start_time_seconds);
        let metric_encoder = encoder.encode_descriptor(
            "process_start_time_seconds",
            "Start time of the process since unix epoch in seconds",
            None,
            start_time.metric_type(),
        )?;
        start_time.encode(metric_encoder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRegistry;

    #[derive(Debug)]
    struct BuildInfo;

    impl Collector for BuildInfo {
        fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
            let gauge = ConstGauge::new(1i64);
            let metric_encoder =
                encoder.encode_descriptor("build_info", "Build information", None, gauge.metric_type())?;
            gauge.encode(metric_encoder)
        }
    }

    #[test]
    fn test_process_stats_start_time_is_stable() {
        let first = ProcessStatsCollector::new();
        let second = ProcessStatsCollector::new();
        assert!(first.start_time_seconds() > 0.0);
        assert_eq!(first.start_time_seconds(), second.start_time_seconds());
    }

    #[test]
    fn test_process_stats_exposition() {
        let registry = MetricRegistry::new();
        registry.register_on_demand_collectors(StandardCollector::defaults());

        let snapshot = registry.collect_all().unwrap();
        let family = snapshot.family("process_start_time_seconds").unwrap();
        assert_eq!(family.samples().count(), 1);
        assert!(family.lines().any(|line| line == "# TYPE process_start_time_seconds gauge"));
    }

    #[test]
    fn test_custom_collector() {
        let registry = MetricRegistry::new();
        let registered =
            registry.register_on_demand_collectors([StandardCollector::Custom(Box::new(BuildInfo))]);
        assert_eq!(registered, 1);

        let snapshot = registry.collect_all().unwrap();
        let samples: Vec<_> = snapshot.family("build_info").unwrap().samples().collect();
        assert_eq!(samples, vec!["build_info 1"]);
    }

    #[test]
    fn test_defaults_are_process_stats() {
        let defaults = StandardCollector::defaults();
        assert_eq!(defaults.len(), 1);
        assert!(defaults[0].is_process_stats());
        assert!(!StandardCollector::Custom(Box::new(BuildInfo)).is_process_stats());
    }
}
