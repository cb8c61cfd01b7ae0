//! Connection pool statistics exported on every Prometheus scrape.

use std::time::Duration;

use prometheus::core::{Collector, Desc, Describer};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, Opts};

use crate::config::METRIC_SUBSYSTEM;
use crate::error::Result;

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Maximum number of open connections.
    pub max_open: u64,
    /// Established connections, in use and idle.
    pub open: u64,
    pub in_use: u64,
    pub idle: u64,
    /// Total number of connections waited for.
    pub wait_count: u64,
    /// Total time blocked waiting for a new connection.
    pub wait_duration: Duration,
    /// Connections closed because of the idle cap.
    pub max_idle_closed: u64,
    /// Connections closed because of the idle timeout.
    pub max_idle_time_closed: u64,
    /// Connections closed because of the lifetime limit.
    pub max_lifetime_closed: u64,
}

/// A handle that can report its pool counters.
pub trait PoolStatsSource: Send + Sync {
    fn pool_stats(&self) -> PoolStats;
}

impl<F> PoolStatsSource for F
where
    F: Fn() -> PoolStats + Send + Sync,
{
    fn pool_stats(&self) -> PoolStats {
        self()
    }
}

/// sqlx pools expose size, idle count and the configured maximum; wait and
/// close counters are reported as zero.
#[cfg(feature = "mysql")]
impl PoolStatsSource for sea_orm::sqlx::MySqlPool {
    fn pool_stats(&self) -> PoolStats {
        let open = u64::from(self.size());
        let idle = self.num_idle() as u64;
        PoolStats {
            max_open: u64::from(self.options().get_max_connections()),
            open,
            in_use: open.saturating_sub(idle),
            idle,
            ..PoolStats::default()
        }
    }
}

#[cfg(feature = "mysql")]
impl PoolStatsSource for sea_orm::DatabaseConnection {
    fn pool_stats(&self) -> PoolStats {
        match self {
            sea_orm::DatabaseConnection::SqlxMySqlPoolConnection(_) => {
                self.get_mysql_connection_pool().pool_stats()
            }
            _ => PoolStats::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Gauge,
    Counter,
}

#[derive(Clone)]
struct PoolMetric {
    opts: Opts,
    desc: Desc,
    kind: ValueKind,
    eval: fn(&PoolStats) -> f64,
}

impl PoolMetric {
    fn family(&self, stats: &PoolStats) -> Option<MetricFamily> {
        let value = (self.eval)(stats);
        let families = match self.kind {
            ValueKind::Gauge => {
                let gauge = Gauge::with_opts(self.opts.clone()).ok()?;
                gauge.set(value);
                gauge.collect()
            }
            ValueKind::Counter => {
                let counter = Counter::with_opts(self.opts.clone()).ok()?;
                counter.inc_by(value.max(0.0));
                counter.collect()
            }
        };
        families.into_iter().next()
    }
}

/// Prometheus collector that reads a fresh [`PoolStats`] on every collection.
///
/// | Metric | Type |
/// |--------|------|
/// | `<ns>_sqlm_db_max_open_conns` | gauge |
/// | `<ns>_sqlm_db_open_conns` | gauge |
/// | `<ns>_sqlm_db_in_use_conns` | gauge |
/// | `<ns>_sqlm_db_idle_conns` | gauge |
/// | `<ns>_sqlm_db_waited_for_total` | counter |
/// | `<ns>_sqlm_db_blocked_seconds` | counter |
/// | `<ns>_sqlm_db_closed_max_idle_total` | counter |
/// | `<ns>_sqlm_db_closed_max_idle_time_total` | counter |
/// | `<ns>_sqlm_db_closed_max_lifetime_total` | counter |
///
/// Every metric carries a constant `db_name` label unless the name is empty.
#[derive(Clone)]
pub struct PoolStatsCollector<S> {
    source: S,
    metrics: Vec<PoolMetric>,
}

impl<S: PoolStatsSource> PoolStatsCollector<S> {
    pub fn new(namespace: &str, db_name: &str, source: S) -> Result<Self> {
        let defs: [(&str, &str, ValueKind, fn(&PoolStats) -> f64); 9] = [
            (
                "db_max_open_conns",
                "Maximum number of open connections to the database.",
                ValueKind::Gauge,
                |s| s.max_open as f64,
            ),
            (
                "db_open_conns",
                "The number of established connections both in use and idle.",
                ValueKind::Gauge,
                |s| s.open as f64,
            ),
            (
                "db_in_use_conns",
                "The number of connections currently in use.",
                ValueKind::Gauge,
                |s| s.in_use as f64,
            ),
            (
                "db_idle_conns",
                "The number of idle connections.",
                ValueKind::Gauge,
                |s| s.idle as f64,
            ),
            (
                "db_waited_for_total",
                "The total number of connections waited for.",
                ValueKind::Counter,
                |s| s.wait_count as f64,
            ),
            (
                "db_blocked_seconds",
                "The total time blocked waiting for a new connection.",
                ValueKind::Counter,
                |s| s.wait_duration.as_secs_f64(),
            ),
            (
                "db_closed_max_idle_total",
                "The total number of connections closed due to the idle connection cap.",
                ValueKind::Counter,
                |s| s.max_idle_closed as f64,
            ),
            (
                "db_closed_max_idle_time_total",
                "The total number of connections closed due to the idle timeout.",
                ValueKind::Counter,
                |s| s.max_idle_time_closed as f64,
            ),
            (
                "db_closed_max_lifetime_total",
                "The total number of connections closed due to the maximum lifetime.",
                ValueKind::Counter,
                |s| s.max_lifetime_closed as f64,
            ),
        ];

        let metrics = defs
            .into_iter()
            .map(|(name, help, kind, eval)| -> Result<PoolMetric> {
                let mut opts = Opts::new(name, help)
                    .namespace(namespace)
                    .subsystem(METRIC_SUBSYSTEM);
                if !db_name.is_empty() {
                    opts = opts.const_label("db_name", db_name);
                }
                let desc = opts.describe()?;
                Ok(PoolMetric {
                    opts,
                    desc,
                    kind,
                    eval,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { source, metrics })
    }
}

impl<S: PoolStatsSource> Collector for PoolStatsCollector<S> {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.iter().map(|m| &m.desc).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let stats = self.source.pool_stats();
        self.metrics
            .iter()
            .filter_map(|m| m.family(&stats))
            .collect()
    }
}
