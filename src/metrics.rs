//! Per-statement Prometheus instruments.

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::config::{DEFAULT_NAMESPACE, METRIC_SUBSYSTEM};
use crate::error::Result;
use crate::parser::sanitize_label;
use crate::routing::StatementClass;

const LABELS: [&str; 2] = ["query", "type"];

static GLOBAL: Lazy<QueryMetrics> = Lazy::new(|| {
    let metrics = QueryMetrics::new(DEFAULT_NAMESPACE)
        .expect("default namespace is a valid metric name prefix");
    if let Err(e) = metrics.register(prometheus::default_registry()) {
        tracing::warn!(error = %e, "failed to register default query metrics");
    }
    metrics
});

/// Counters and latency histogram for executed statements.
///
/// Every instrument is labeled by `query` (normalized, digit-stripped text)
/// and `type` ([`StatementClass`]). Cloning shares the underlying series.
///
/// | Metric | Type |
/// |--------|------|
/// | `<ns>_sqlm_query_total` | counter |
/// | `<ns>_sqlm_query_success` | counter |
/// | `<ns>_sqlm_query_error` | counter |
/// | `<ns>_sqlm_query_latency` | histogram (seconds) |
#[derive(Clone)]
pub struct QueryMetrics {
    namespace: String,
    total: CounterVec,
    success: CounterVec,
    errors: CounterVec,
    latency: HistogramVec,
}

impl QueryMetrics {
    /// Build the instruments under `namespace`. Nothing is registered yet.
    pub fn new(namespace: &str) -> Result<Self> {
        let counter = |name: &str, help: &str| {
            CounterVec::new(
                Opts::new(name, help)
                    .namespace(namespace)
                    .subsystem(METRIC_SUBSYSTEM),
                &LABELS,
            )
        };

        Ok(Self {
            namespace: namespace.to_string(),
            total: counter("query_total", "The total number of query executions.")?,
            success: counter("query_success", "The number of successful query executions.")?,
            errors: counter("query_error", "The number of erroneous query executions.")?,
            latency: HistogramVec::new(
                HistogramOpts::new("query_latency", "The latency of query execution in seconds.")
                    .namespace(namespace)
                    .subsystem(METRIC_SUBSYSTEM),
                &LABELS,
            )?,
        })
    }

    /// Process-wide instance under the default namespace, registered in
    /// [`prometheus::default_registry`] on first use.
    pub fn global() -> &'static QueryMetrics {
        &GLOBAL
    }

    /// Register all four instruments in `registry`.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.clone()))?;
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store_total(&self, query: &str, class: StatementClass) {
        let label = sanitize_label(query);
        self.total.with_label_values(&[label.as_str(), class.as_str()]).inc();
    }

    pub fn store_success(&self, query: &str, class: StatementClass) {
        let label = sanitize_label(query);
        self.success.with_label_values(&[label.as_str(), class.as_str()]).inc();
    }

    pub fn store_error(&self, query: &str, class: StatementClass) {
        let label = sanitize_label(query);
        self.errors.with_label_values(&[label.as_str(), class.as_str()]).inc();
    }

    pub fn store_latency(&self, query: &str, elapsed: Duration, class: StatementClass) {
        let label = sanitize_label(query);
        self.latency
            .with_label_values(&[label.as_str(), class.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Read the current values for one label pair without creating the
    /// series. `query` is sanitized the same way stored labels are.
    pub fn counts(&self, query: &str, class: StatementClass) -> QueryCounts {
        let label = sanitize_label(query);
        let labels = [label.as_str(), class.as_str()];

        let counter = |vec: &CounterVec| {
            find_series(vec.collect(), &labels)
                .map(|m| m.get_counter().get_value() as u64)
                .unwrap_or(0)
        };
        let latency = find_series(self.latency.collect(), &labels);

        QueryCounts {
            total: counter(&self.total),
            success: counter(&self.success),
            error: counter(&self.errors),
            latency_samples: latency
                .as_ref()
                .map(|m| m.get_histogram().get_sample_count())
                .unwrap_or(0),
            latency_seconds: latency
                .as_ref()
                .map(|m| m.get_histogram().get_sample_sum())
                .unwrap_or(0.0),
        }
    }
}

fn find_series(
    families: Vec<MetricFamily>,
    labels: &[&str; 2],
) -> Option<prometheus::proto::Metric> {
    families
        .into_iter()
        .flat_map(|mut family| family.take_metric().into_vec())
        .find(|metric| {
            metric.get_label().len() == LABELS.len()
                && LABELS.iter().zip(labels).all(|(name, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                })
        })
}

impl std::fmt::Debug for QueryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMetrics")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Collector for QueryMetrics {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.total.desc();
        descs.extend(self.success.desc());
        descs.extend(self.errors.desc());
        descs.extend(self.latency.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = self.total.collect();
        families.extend(self.success.collect());
        families.extend(self.errors.collect());
        families.extend(self.latency.collect());
        families
    }
}

/// Point-in-time values of one `(query, type)` series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryCounts {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub latency_samples: u64,
    pub latency_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_store_and_read_back() {
        let metrics = QueryMetrics::new("test").unwrap();
        let query = "SELECT * FROM t WHERE id IN ()";

        metrics.store_total(query, StatementClass::Primary);
        metrics.store_success(query, StatementClass::Primary);
        metrics.store_latency(query, Duration::from_millis(250), StatementClass::Primary);

        let counts = metrics.counts(query, StatementClass::Primary);
        assert_eq!(counts.total, 1);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.error, 0);
        assert_eq!(counts.latency_samples, 1);
        assert!((counts.latency_seconds - 0.25).abs() < 1e-9);

        assert_eq!(
            metrics.counts(query, StatementClass::Replica),
            QueryCounts::default()
        );
    }

    #[test]
    fn test_labels_are_sanitized() {
        let metrics = QueryMetrics::new("test").unwrap();
        metrics.store_total("SELECT * FROM t WHERE id IN (1,2,3)", StatementClass::Primary);
        metrics.store_total("SELECT * FROM t WHERE id IN (4,5)", StatementClass::Primary);

        assert_eq!(
            metrics
                .counts("SELECT * FROM t WHERE id IN ()", StatementClass::Primary)
                .total,
            2
        );
    }

    #[test]
    fn test_counts_do_not_create_series() {
        let metrics = QueryMetrics::new("test").unwrap();
        metrics.counts("SELECT 1", StatementClass::Primary);
        assert!(metrics.collect().iter().all(|f| f.get_metric().is_empty()));
    }

    #[test]
    fn test_register_and_export() {
        let registry = Registry::new();
        let metrics = QueryMetrics::new("dx").unwrap();
        metrics.register(&registry).unwrap();

        metrics.store_total("DELETE FROM t WHERE id = ?", StatementClass::Replica);
        metrics.store_error("DELETE FROM t WHERE id = ?", StatementClass::Replica);

        let mut buf = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.contains(r#"dx_sqlm_query_total{query="DELETE FROM t WHERE id = ?",type="slave"} 1"#));
        assert!(text.contains(r#"dx_sqlm_query_error{query="DELETE FROM t WHERE id = ?",type="slave"} 1"#));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        let metrics = QueryMetrics::new("dx").unwrap();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }

    #[test]
    fn test_invalid_namespace() {
        assert!(QueryMetrics::new("not a namespace").is_err());
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = QueryMetrics::new("test").unwrap();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        metrics.store_total("SELECT * FROM t", StatementClass::Primary);
                    }
                });
            }
        });
        assert_eq!(
            metrics.counts("SELECT * FROM t", StatementClass::Primary).total,
            8000
        );
    }
}
