//! Content negotiation and serialization of snapshots.

use crate::metrics::registry::{sample_name, MetricFamily, Snapshot};
use std::io::{self, Write};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Content type of the OpenMetrics text format.
pub const OPENMETRICS_TEXT_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

const OPENMETRICS_MEDIA_TYPE: &str = "application/openmetrics-text";

/// Wire format a snapshot is serialized in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExpositionFormat {
    #[default]
    PrometheusText,
    OpenMetricsText,
}

impl ExpositionFormat {
    /// Value for the `Content-Type` response header.
    pub fn content_type(self) -> &'static str {
        match self {
            ExpositionFormat::PrometheusText => PROMETHEUS_TEXT_CONTENT_TYPE,
            ExpositionFormat::OpenMetricsText => OPENMETRICS_TEXT_CONTENT_TYPE,
        }
    }
}

/// Pick the exposition format for an `Accept` header value.
///
/// Falls back to the Prometheus text format when the header is absent, empty
/// or names nothing we can produce.
pub fn resolve_content_type(accept: Option<&str>) -> ExpositionFormat {
    let Some(accept) = accept else {
        return ExpositionFormat::default();
    };

    let wants_openmetrics = accept.split(',').any(|entry| {
        let mut params = entry.split(';').map(str::trim);
        let media_type = params.next().unwrap_or_default();
        media_type.eq_ignore_ascii_case(OPENMETRICS_MEDIA_TYPE) && !is_refused(params)
    });

    if wants_openmetrics {
        ExpositionFormat::OpenMetricsText
    } else {
        ExpositionFormat::default()
    }
}

/// Whether the media range parameters carry `q=0`.
fn is_refused<'a>(mut params: impl Iterator<Item = &'a str>) -> bool {
    params.any(|param| {
        param
            .strip_prefix("q=")
            .and_then(|q| q.trim().parse::<f32>().ok())
            .is_some_and(|q| q <= 0.0)
    })
}

/// Serialize `snapshot` into `writer` in the given format.
pub fn encode<W: Write>(
    snapshot: &Snapshot,
    format: ExpositionFormat,
    writer: &mut W,
) -> io::Result<()> {
    for family in snapshot.families() {
        match format {
            ExpositionFormat::PrometheusText => write_prometheus_family(family, writer)?,
            ExpositionFormat::OpenMetricsText => {
                for line in family.lines() {
                    writer.write_all(line.as_bytes())?;
                    writer.write_all(b"\n")?;
                }
            }
        }
    }

    if format == ExpositionFormat::OpenMetricsText {
        writer.write_all(b"# EOF\n")?;
    }

    writer.flush()
}

/// Rewrite one OpenMetrics family into the 0.0.4 text format.
///
/// The 0.0.4 format only knows counter, gauge, histogram, summary and
/// untyped, names counters after their `_total` samples, and has no
/// exemplars, units or `_created` samples.
fn write_prometheus_family<W: Write>(family: &MetricFamily, writer: &mut W) -> io::Result<()> {
    let name = family.name();
    let kind = family
        .lines()
        .find_map(|line| line.strip_prefix("# TYPE "))
        .and_then(|rest| rest.split_whitespace().nth(1))
        .unwrap_or("unknown");

    // `None` drops the descriptors; the samples are then read as untyped.
    let (exposed_name, exposed_kind) = match kind {
        "counter" => (format!("{name}_total"), Some("counter")),
        "gauge" | "histogram" | "summary" => (name.to_string(), Some(kind)),
        "info" => (format!("{name}_info"), Some("gauge")),
        "stateset" => (name.to_string(), Some("gauge")),
        "gaugehistogram" => (name.to_string(), None),
        _ => (name.to_string(), Some("untyped")),
    };
    let created = format!("{name}_created");

    for line in family.lines() {
        if let Some(rest) = line.strip_prefix("# HELP ") {
            if exposed_kind.is_some() {
                match rest.split_once(' ') {
                    Some((_, help)) => writeln!(writer, "# HELP {exposed_name} {help}")?,
                    None => writeln!(writer, "# HELP {exposed_name}")?,
                }
            }
        } else if line.starts_with("# TYPE ") {
            if let Some(kind) = exposed_kind {
                writeln!(writer, "# TYPE {exposed_name} {kind}")?;
            }
        } else if line.starts_with('#') {
            continue;
        } else {
            let sample = strip_exemplar(line);
            if sample_name(sample) == created {
                continue;
            }
            writer.write_all(sample.as_bytes())?;
            writer.write_all(b"\n")?;
        }
    }

    Ok(())
}

/// Drop a trailing ` # {labels} value [timestamp]` exemplar from a sample.
fn strip_exemplar(line: &str) -> &str {
    let value_start = match line.find(['{', ' ']) {
        Some(open) if line.as_bytes()[open] == b'{' => label_set_end(line, open).unwrap_or(line.len()),
        Some(space) => space,
        None => return line,
    };

    match line[value_start..].find(" # ") {
        Some(offset) => line[..value_start + offset].trim_end(),
        None => line,
    }
}

/// Index just past the `}` closing the label set opened at `open`.
fn label_set_end(line: &str, open: usize) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in line[open..].char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(open + i + 1),
            _ => {}
        }
    }

    None
}
