//! Metrics snapshot module
//!
//! Periodically renders the Prometheus recorder and publishes the samples
//! through OpenTelemetry observable instruments. The periodic reader of the
//! meter provider collects those instruments and exports them over OTLP.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::metrics::Meter;
use opentelemetry::KeyValue;
use prometheus_parse::{Scrape, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time;

/// OTLP metric shape of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic cumulative sum
    Counter,
    Gauge,
}

/// One sample taken from the recorder
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Sorted by label name
    pub labels: Vec<(String, String)>,
    pub time_unix_nano: u64,
}

impl MetricPoint {
    fn attributes(&self) -> Vec<KeyValue> {
        self.labels
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
            .collect()
    }
}

type SampleCache = Arc<RwLock<HashMap<String, Vec<MetricPoint>>>>;

/// Publishes recorder samples through observable instruments
///
/// One instrument is registered per metric name the first time it shows up;
/// its callback reports the samples of the latest snapshot.
pub struct PrometheusBridge {
    handle: Arc<PrometheusHandle>,
    meter: Meter,
    latest: SampleCache,
    registered: Mutex<HashSet<String>>,
}

impl PrometheusBridge {
    pub fn new(handle: Arc<PrometheusHandle>, meter: Meter) -> Self {
        Self {
            handle,
            meter,
            latest: Arc::new(RwLock::new(HashMap::new())),
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// Capture one snapshot; returns the number of samples published
    pub fn capture(&self) -> Result<usize> {
        let metrics_text = self.handle.render();
        let points = parse_prometheus_metrics(&metrics_text, now_nanos())?;
        let count = points.len();

        let mut by_name: HashMap<String, Vec<MetricPoint>> = HashMap::new();
        for point in points {
            by_name.entry(point.name.clone()).or_default().push(point);
        }

        for (name, points) in &by_name {
            if let Some(first) = points.first() {
                self.register(name, first.kind);
            }
        }

        // Poisoning only means a callback panicked mid-read; the map is intact.
        let mut latest = self.latest.write().unwrap_or_else(|p| p.into_inner());
        *latest = by_name;

        Ok(count)
    }

    fn register(&self, name: &str, kind: MetricKind) {
        let mut registered = self.registered.lock().unwrap_or_else(|p| p.into_inner());
        if !registered.insert(name.to_string()) {
            return;
        }

        let cache = Arc::clone(&self.latest);
        let key = name.to_string();
        match kind {
            MetricKind::Counter => {
                let _ = self
                    .meter
                    .f64_observable_counter(name.to_string())
                    .with_callback(move |observer| {
                        for point in cached_points(&cache, &key) {
                            observer.observe(point.value, &point.attributes());
                        }
                    })
                    .build();
            }
            MetricKind::Gauge => {
                let _ = self
                    .meter
                    .f64_observable_gauge(name.to_string())
                    .with_callback(move |observer| {
                        for point in cached_points(&cache, &key) {
                            observer.observe(point.value, &point.attributes());
                        }
                    })
                    .build();
            }
        }

        tracing::debug!(metric = %name, kind = ?kind, "Registered observable instrument");
    }

    pub fn registered(&self) -> usize {
        self.registered.lock().map(|r| r.len()).unwrap_or_default()
    }
}

fn cached_points(cache: &SampleCache, name: &str) -> Vec<MetricPoint> {
    cache
        .read()
        .map(|latest| latest.get(name).cloned().unwrap_or_default())
        .unwrap_or_default()
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Spawn background task to snapshot metrics periodically
///
/// The task runs until aborted by the export router.
pub fn spawn_snapshot_task(
    bridge: Arc<PrometheusBridge>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        snapshot_loop(bridge, interval).await;
    })
}

/// Main snapshot loop
async fn snapshot_loop(bridge: Arc<PrometheusBridge>, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match bridge.capture() {
            Ok(count) => {
                tracing::debug!(count = count, "Metrics snapshot captured");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to capture metrics snapshot"
                );
            }
        }
    }
}

/// Parse Prometheus text format into metric points
///
/// Histogram buckets become `{name}_bucket` counters labelled with `le`;
/// summary quantiles become gauges labelled with `quantile`.
pub fn parse_prometheus_metrics(text: &str, time_unix_nano: u64) -> Result<Vec<MetricPoint>> {
    let lines: Vec<_> = text.lines().map(|s| Ok(s.to_owned())).collect();
    let scrape = Scrape::parse(lines.into_iter())?;

    let mut points = Vec::new();
    for sample in scrape.samples {
        let mut labels: Vec<(String, String)> = sample
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.sort();

        let point = |name: String, kind, value, labels| MetricPoint {
            name,
            kind,
            value,
            labels,
            time_unix_nano,
        };

        match &sample.value {
            Value::Counter(v) => {
                points.push(point(sample.metric.clone(), MetricKind::Counter, *v, labels));
            }
            Value::Gauge(v) | Value::Untyped(v) => {
                points.push(point(sample.metric.clone(), MetricKind::Gauge, *v, labels));
            }
            Value::Histogram(buckets) => {
                for bucket in buckets {
                    let mut bucket_labels = labels.clone();
                    bucket_labels.push(("le".to_string(), format_bound(bucket.less_than)));
                    bucket_labels.sort();
                    points.push(point(
                        format!("{}_bucket", sample.metric),
                        MetricKind::Counter,
                        bucket.count,
                        bucket_labels,
                    ));
                }
            }
            Value::Summary(quantiles) => {
                for quantile in quantiles {
                    let mut quantile_labels = labels.clone();
                    quantile_labels.push(("quantile".to_string(), quantile.quantile.to_string()));
                    quantile_labels.sort();
                    points.push(point(
                        sample.metric.clone(),
                        MetricKind::Gauge,
                        quantile.count,
                        quantile_labels,
                    ));
                }
            }
        }
    }

    Ok(points)
}

fn format_bound(bound: f64) -> String {
    if bound.is_infinite() {
        "+Inf".to_string()
    } else {
        bound.to_string()
    }
}
