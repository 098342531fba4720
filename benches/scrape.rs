//! Benchmarks for the scrape path.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use promserve::metrics::{encode, resolve_content_type, ExpositionFormat, MetricRegistry};
use promserve::server::ScrapeHandler;

type Labels = Vec<(String, String)>;

fn populated_registry(series: usize) -> MetricRegistry {
    let registry = MetricRegistry::new();
    let family = Family::<Labels, Counter>::default();
    registry.register("requests", "Requests by route", family.clone());

    for i in 0..series {
        family
            .get_or_create(&vec![("route".to_string(), format!("/route/{i}"))])
            .inc_by(i as u64);
    }

    registry
}

fn benchmark_negotiation(c: &mut Criterion) {
    let mut group = c.benchmark_group("negotiation");

    group.bench_function("missing", |b| {
        b.iter(|| black_box(resolve_content_type(black_box(None))));
    });

    group.bench_function("prometheus_accept", |b| {
        let accept = "application/openmetrics-text;version=1.0.0;q=0.5,text/plain;version=0.0.4;q=0.4,*/*;q=0.1";
        b.iter(|| black_box(resolve_content_type(black_box(Some(accept)))));
    });

    group.finish();
}

fn benchmark_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");

    for series in [10, 100, 1000] {
        let registry = populated_registry(series);
        group.throughput(Throughput::Elements(series as u64));
        group.bench_function(format!("collect_all_{series}"), |b| {
            b.iter(|| black_box(registry.collect_all().unwrap()));
        });
    }

    group.finish();
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let snapshot = populated_registry(1000).collect_all().unwrap();

    for format in [ExpositionFormat::PrometheusText, ExpositionFormat::OpenMetricsText] {
        group.bench_function(format!("{format:?}"), |b| {
            let mut buffer = Vec::with_capacity(64 * 1024);
            b.iter(|| {
                buffer.clear();
                encode(black_box(&snapshot), format, &mut buffer).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_scrape(c: &mut Criterion) {
    let handler = ScrapeHandler::new(populated_registry(100), "metrics/");

    c.bench_function("scrape_100_series", |b| {
        b.iter(|| black_box(handler.scrape(black_box(Some("text/plain"))).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_negotiation,
    benchmark_collect,
    benchmark_encode,
    benchmark_scrape,
);

criterion_main!(benches);
