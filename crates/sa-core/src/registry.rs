//! Explicit metric registry for the service.
//!
//! Rather than installing a process-global recorder, the service builds one
//! [`MetricsScope`] at startup and hands it to every component that publishes
//! metrics. The scope owns a Prometheus recorder and refuses to register the
//! same metric name twice or a name Prometheus would reject, which turns
//! wiring mistakes into startup errors instead of silently merged series.

use crate::{Error, Result};
use metrics::{
    Counter, Gauge, Histogram, Key, KeyName, Label, Level, Metadata, Recorder, SharedString, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Histogram buckets (seconds) used for every latency histogram.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Metric registry shared by the components of one process.
#[derive(Clone)]
pub struct MetricsScope {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
    registered: Arc<Mutex<HashSet<&'static str>>>,
}

impl MetricsScope {
    /// Builds an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Metric`] if the Prometheus recorder cannot be built.
    pub fn new() -> Result<Self> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(LATENCY_BUCKETS)
            .map_err(|e| Error::Metric {
                reason: e.to_string(),
            })?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
            registered: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Registers an unlabelled gauge.
    pub fn gauge(&self, name: &'static str, help: &'static str) -> Result<Gauge> {
        self.claim(name)?;
        self.recorder
            .describe_gauge(KeyName::from_const_str(name), None, help.into());
        Ok(self
            .recorder
            .register_gauge(&Key::from_static_name(name), &METADATA))
    }

    /// Registers an unlabelled counter.
    pub fn counter(&self, name: &'static str, help: &'static str) -> Result<Counter> {
        self.claim(name)?;
        self.recorder
            .describe_counter(KeyName::from_const_str(name), None, help.into());
        Ok(self
            .recorder
            .register_counter(&Key::from_static_name(name), &METADATA))
    }

    /// Registers a family of gauges distinguished by labels.
    pub fn gauge_vec(&self, name: &'static str, help: &'static str) -> Result<GaugeVec> {
        self.claim(name)?;
        self.recorder
            .describe_gauge(KeyName::from_const_str(name), None, help.into());
        Ok(GaugeVec {
            recorder: Arc::clone(&self.recorder),
            name,
        })
    }

    /// Registers a family of counters distinguished by labels.
    pub fn counter_vec(&self, name: &'static str, help: &'static str) -> Result<CounterVec> {
        self.claim(name)?;
        self.recorder
            .describe_counter(KeyName::from_const_str(name), None, help.into());
        Ok(CounterVec {
            recorder: Arc::clone(&self.recorder),
            name,
        })
    }

    /// Registers a family of latency histograms (seconds) distinguished by
    /// labels.
    pub fn histogram_vec(&self, name: &'static str, help: &'static str) -> Result<HistogramVec> {
        self.claim(name)?;
        self.recorder.describe_histogram(
            KeyName::from_const_str(name),
            Some(Unit::Seconds),
            help.into(),
        );
        Ok(HistogramVec {
            recorder: Arc::clone(&self.recorder),
            name,
        })
    }

    /// Whether `name` has been registered in this scope.
    pub fn is_registered(&self, name: &str) -> bool {
        self.registered.lock().contains(name)
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.run_upkeep();
        self.handle.render()
    }

    fn claim(&self, name: &'static str) -> Result<()> {
        if !is_valid_metric_name(name) {
            return Err(Error::Metric {
                reason: format!("invalid metric name {name:?}"),
            });
        }
        if !self.registered.lock().insert(name) {
            return Err(Error::Metric {
                reason: format!("duplicate metric name {name:?}"),
            });
        }
        Ok(())
    }
}

/// Labelled gauges sharing one metric name.
#[derive(Clone)]
pub struct GaugeVec {
    recorder: Arc<PrometheusRecorder>,
    name: &'static str,
}

impl GaugeVec {
    pub fn with_labels(&self, labels: &[(&'static str, String)]) -> Gauge {
        self.recorder
            .register_gauge(&key(self.name, labels), &METADATA)
    }
}

/// Labelled counters sharing one metric name.
#[derive(Clone)]
pub struct CounterVec {
    recorder: Arc<PrometheusRecorder>,
    name: &'static str,
}

impl CounterVec {
    pub fn with_labels(&self, labels: &[(&'static str, String)]) -> Counter {
        self.recorder
            .register_counter(&key(self.name, labels), &METADATA)
    }
}

/// Labelled histograms sharing one metric name.
#[derive(Clone)]
pub struct HistogramVec {
    recorder: Arc<PrometheusRecorder>,
    name: &'static str,
}

impl HistogramVec {
    pub fn with_labels(&self, labels: &[(&'static str, String)]) -> Histogram {
        self.recorder
            .register_histogram(&key(self.name, labels), &METADATA)
    }
}

fn key(name: &'static str, labels: &[(&'static str, String)]) -> Key {
    let labels: Vec<Label> = labels
        .iter()
        .map(|(k, v)| Label::new(*k, SharedString::from(v.clone())))
        .collect();
    Key::from_parts(name, labels)
}

/// Prometheus metric names match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_values_are_rendered() {
        let scope = MetricsScope::new().unwrap();
        let gauge = scope
            .gauge("max_db_connections", "Maximum number of DB connections allowed.")
            .unwrap();
        gauge.set(10.0);

        let text = scope.render();
        assert!(text.contains("max_db_connections 10"), "{text}");
        assert!(scope.is_registered("max_db_connections"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let scope = MetricsScope::new().unwrap();
        scope.gauge("db_idle_connections", "idle").unwrap();

        let err = scope.counter("db_idle_connections", "again").unwrap_err();
        assert!(matches!(err, Error::Metric { .. }));
    }

    #[test]
    fn clones_share_the_registry() {
        let scope = MetricsScope::new().unwrap();
        let clone = scope.clone();
        clone.counter("rpcs_total", "rpcs").unwrap().increment(3);

        assert!(scope.gauge("rpcs_total", "dup").is_err());
        assert!(scope.render().contains("rpcs_total 3"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let scope = MetricsScope::new().unwrap();
        for name in ["", "9lives", "with-dash", "white space"] {
            assert!(scope.gauge(name, "bad").is_err(), "{name:?} accepted");
        }
        assert!(!scope.is_registered("with-dash"));
    }

    #[test]
    fn labelled_series_are_distinct() {
        let scope = MetricsScope::new().unwrap();
        let handled = scope
            .counter_vec("grpc_server_handled_total", "handled")
            .unwrap();
        handled
            .with_labels(&[("method", "/a.A/Get".to_string())])
            .increment(2);
        handled
            .with_labels(&[("method", "/a.A/Put".to_string())])
            .increment(1);

        let text = scope.render();
        assert!(text.contains(r#"grpc_server_handled_total{method="/a.A/Get"} 2"#), "{text}");
        assert!(text.contains(r#"grpc_server_handled_total{method="/a.A/Put"} 1"#), "{text}");
    }
}
