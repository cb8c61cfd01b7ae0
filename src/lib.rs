//! # sqlm
//!
//! Prometheus metrics and tracing spans for every SQL statement run through a
//! SeaORM connection, without changing call sites.
//!
//! Statements pass through three hooks: before execution, after success and
//! after an error. The hooks classify the statement, normalize its text into a
//! low-cardinality label, attribute it to the primary or replica endpoint,
//! open a span, and on completion close the span and update four
//! instruments.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::Database;
//! use sqlm::{HookedConnection, MonitorConfig, SqlHooks};
//!
//! let registry = prometheus::Registry::new();
//! let hooks = SqlHooks::with_registry(MonitorConfig::default(), &registry)?;
//!
//! let db = Database::connect("mysql://app@localhost/shop").await?;
//! let db = HookedConnection::new(db, hooks);
//!
//! // Use it exactly like a normal DatabaseConnection
//! let users = Users::find().all(&db).await?;
//! ```
//!
//! ## Labels
//!
//! Statement text is normalized before it becomes a label:
//!
//! | Input | Label |
//! |-------|-------|
//! | `SELECT * FROM t WHERE id IN (?,?,?)` | `SELECT * FROM t WHERE id IN ()` |
//! | `INSERT INTO t VALUES (1,2),(3,4)` | `INSERT INTO t VALUES (? ?)` |
//! | `SELECT * FROM t WHERE id IN (1,2,3)` | `SELECT * FROM t WHERE id IN ()` |
//!
//! Normalization is regex-based and not SQL-aware: varied string literals or
//! nested expressions are not collapsed and will add label values.
//!
//! ## Metrics
//!
//! | Metric | Labels |
//! |--------|--------|
//! | `<ns>_sqlm_query_total` | `query`, `type` |
//! | `<ns>_sqlm_query_success` | `query`, `type` |
//! | `<ns>_sqlm_query_error` | `query`, `type` |
//! | `<ns>_sqlm_query_latency` | `query`, `type` |
//! | `<ns>_sqlm_db_*` pool statistics | `db_name` |
//!
//! `type` is `master` or `slave`, see [`StatementClass`].

mod config;
mod connection;
mod error;
mod hooks;
mod metrics;
mod parser;
mod pool;
mod routing;
mod span;

#[cfg(feature = "mysql")]
mod connect;

pub use config::{MonitorConfig, PoolOptions, DEFAULT_NAMESPACE, METRIC_SUBSYSTEM};
pub use connection::{HookedConnection, HookedExt};
pub use error::{Error, Result};
pub use hooks::{
    DriverError, ErrorHookFailure, ExecutionContext, QueryContext, QueryHooks, SqlHooks,
};
pub use metrics::{QueryCounts, QueryMetrics};
pub use parser::{
    collapse_insert_values, collapse_placeholders, is_insert, normalize, sanitize_label,
    ParsedStatement, StatementKind, INSERT_VALUES_PLACEHOLDER,
};
pub use pool::{PoolStats, PoolStatsCollector, PoolStatsSource};
pub use routing::{EndpointIdentity, Endpoints, StatementClass};

#[cfg(feature = "mysql")]
pub use connect::{connect, Connections};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        HookedConnection, HookedExt, MonitorConfig, QueryHooks, QueryMetrics, SqlHooks,
        StatementClass,
    };
}
