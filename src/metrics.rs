//! Metrics collection and reporting for the stream processor.
//!
//! # Overview
//!
//! - [`Metric`] trait defines the interface for custom metrics
//! - [`MetricsCollector`] is a cheaply cloneable, thread-safe registry shared by
//!   the ingress thread and every worker
//! - [`names`] lists the counters and gauges the processor maintains
//! - Metrics are saved as a JSON object keyed by metric name
//!
//! # Example
//!
//! ```
//! use parkflow::metrics::{MetricsCollector, names};
//!
//! let metrics = MetricsCollector::new();
//! metrics.increment_counter(names::EVENTS_RECEIVED, 3);
//! metrics.increment_counter(names::EVENTS_RECEIVED, 1);
//! assert_eq!(metrics.counter(names::EVENTS_RECEIVED), 4);
//! ```

use anyhow::Result;
use serde_json::{Value, json};
use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Names of the built-in metrics.
pub mod names {
    pub const EVENTS_RECEIVED: &str = "events_received";
    pub const MALFORMED_EVENTS: &str = "malformed_events";
    pub const LATE_EVENTS: &str = "late_events";
    pub const LATE_STATE_UPDATES: &str = "late_state_updates";
    pub const STALE_EVENTS: &str = "stale_events";
    pub const WINDOWS_CLOSED: &str = "windows_closed";
    pub const RECORDS_EMITTED: &str = "records_emitted";
    pub const DELIVERY_FAILURES: &str = "delivery_failures";
    pub const PUBLISH_RETRIES: &str = "publish_retries";
    pub const SOURCE_RECONNECTS: &str = "source_reconnects";
    pub const CHECKPOINTS_WRITTEN: &str = "checkpoints_written";

    /// Per-worker watermark gauge, e.g. `watermark_ms.w0`.
    pub fn watermark(worker: usize) -> String {
        format!("watermark_ms.w{worker}")
    }
}

/// Trait for custom metrics.
pub trait Metric: Send + Sync + Any {
    /// The name of this metric (e.g., `records_emitted`).
    fn name(&self) -> &str;

    /// The current value of this metric as a JSON value.
    fn value(&self) -> Value;

    /// Cast to Any for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable cast, used to update built-in metrics in place.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Thread-safe container for processor metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

struct MetricsCollectorInner {
    metrics: HashMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                metrics: HashMap::new(),
                start_time: None,
                end_time: None,
            })),
        }
    }

    // A panic while holding the lock leaves plain counters behind; keep serving them.
    fn lock(&self) -> MutexGuard<'_, MetricsCollectorInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    /// Elapsed run time, once both start and end are recorded.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// Increment a counter metric by name, creating it on first use.
    pub fn increment_counter(&self, name: &str, value: u64) {
        let mut inner = self.lock();
        if let Some(counter) = inner
            .metrics
            .get_mut(name)
            .and_then(|m| m.as_any_mut().downcast_mut::<CounterMetric>())
        {
            counter.count += value;
            return;
        }
        inner
            .metrics
            .insert(name.to_string(), Box::new(CounterMetric::with_value(name, value)));
    }

    /// Current value of a counter, zero if it was never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock()
            .metrics
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<CounterMetric>())
            .map_or(0, |c| c.count)
    }

    /// Set a gauge to `value`, creating it on first use.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut inner = self.lock();
        if let Some(gauge) = inner
            .metrics
            .get_mut(name)
            .and_then(|m| m.as_any_mut().downcast_mut::<GaugeMetric>())
        {
            gauge.value = value;
            return;
        }
        inner
            .metrics
            .insert(name.to_string(), Box::new(GaugeMetric::new(name, value)));
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.lock()
            .metrics
            .get(name)
            .and_then(|m| m.as_any().downcast_ref::<GaugeMetric>())
            .map(|g| g.value)
    }

    /// Get all metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut metrics_json = serde_json::Map::new();

        for (name, metric) in &inner.metrics {
            metrics_json.insert(name.clone(), json!({ "value": metric.value() }));
        }

        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            let elapsed_ms = end.duration_since(start).as_millis();
            let mut time_obj = serde_json::Map::new();
            time_obj.insert("value".to_string(), json!(elapsed_ms));
            time_obj.insert(
                "description".to_string(),
                json!("Total run time in milliseconds"),
            );
            metrics_json.insert("run_time_ms".to_string(), Value::Object(time_obj));
        }
        drop(inner);
        json!(metrics_json)
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = self.to_json();
        let mut file = File::create(path)?;
        let formatted = serde_json::to_string_pretty(&json)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Built-in Metrics ==========

/// A monotonically increasing counter.
pub struct CounterMetric {
    name: String,
    count: u64,
}

impl CounterMetric {
    pub fn with_value(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

impl Metric for CounterMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A gauge metric that holds a single numeric value.
pub struct GaugeMetric {
    name: String,
    value: f64,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
