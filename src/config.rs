//! Configuration for statement monitoring.

use std::time::Duration;

use crate::routing::{EndpointIdentity, Endpoints};

/// Namespace prefixed to every exported metric name.
pub const DEFAULT_NAMESPACE: &str = "dx";

/// Subsystem segment of every exported metric name (`<ns>_sqlm_*`).
pub const METRIC_SUBSYSTEM: &str = "sqlm";

/// Pool sizing applied when opening connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of open connections.
    pub max_open: u32,
    /// Connections kept open while idle.
    pub max_idle: u32,
    /// How long a connection may sit idle before it is closed.
    pub max_idle_time: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 2,
            max_idle_time: Duration::from_secs(300),
        }
    }
}

/// Configuration for the statement hooks.
///
/// # Example
///
/// ```rust
/// use sqlm::{EndpointIdentity, Endpoints, MonitorConfig};
/// use std::time::Duration;
///
/// let config = MonitorConfig::default()
///     .with_namespace("shop")
///     .with_endpoints(Endpoints::new(EndpointIdentity::new("db-1:3306", "shop", "app")))
///     .with_slow_query_threshold(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Metric namespace.
    /// Default: `"dx"`
    pub namespace: String,

    /// Value of the `service.name` span attribute.
    /// Default: `"mysql"`
    pub service_name: String,

    /// Endpoints statements are attributed to in spans.
    pub endpoints: Endpoints,

    /// Pool sizing used when opening the read-write and read-only pools.
    pub pool: PoolOptions,

    /// Statements slower than this are logged at WARN level.
    /// Default: 500ms
    pub slow_query_threshold: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_name: "mysql".to_string(),
            endpoints: Endpoints::default(),
            pool: PoolOptions::default(),
            slow_query_threshold: Duration::from_millis(500),
        }
    }
}

impl MonitorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metric namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the `service.name` recorded on spans.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the primary and replica endpoints.
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set only the primary endpoint.
    pub fn with_primary(mut self, primary: EndpointIdentity) -> Self {
        self.endpoints.primary = primary;
        self
    }

    /// Set only the replica endpoint.
    pub fn with_replica(mut self, replica: EndpointIdentity) -> Self {
        self.endpoints.replica = Some(replica);
        self
    }

    pub fn with_pool_options(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Set the threshold for slow query warnings.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Development-friendly configuration: slow queries are flagged early.
    pub fn development() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(100),
            ..Self::default()
        }
    }

    /// Production configuration: only flag queries slower than a second.
    pub fn production() -> Self {
        Self {
            slow_query_threshold: Duration::from_secs(1),
            ..Self::default()
        }
    }
}
