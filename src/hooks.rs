//! Statement lifecycle hooks.
//!
//! A driver calls three hooks around every statement attempt:
//!
//! ```text
//!            before                 after
//!   Idle ─────────────▶ Started ─────────────▶ Completed
//!                          │
//!                          │ on_error
//!                          ▼
//!                        Failed
//! ```
//!
//! `before` stores an [`ExecutionContext`] in the caller's [`QueryContext`];
//! the terminal hook takes it back out. A context is moved out exactly once,
//! so a statement is accounted for exactly once, and an abandoned context
//! closes its span when dropped.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sea_orm::{DbErr, Value};
use tracing::Span;

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::metrics::QueryMetrics;
use crate::parser::{normalize, ParsedStatement, StatementKind};
use crate::routing::{EndpointIdentity, StatementClass};
use crate::span;

/// An error reported by the driver to the error hook.
pub trait DriverError: Display {
    /// Whether this is the driver's "already handled, do not record" signal.
    fn is_skip(&self) -> bool {
        false
    }
}

impl DriverError for DbErr {}

/// Correlation state of one statement attempt, from `before` to the
/// terminal hook.
#[derive(Debug)]
pub struct ExecutionContext {
    started: Instant,
    span: Span,
    kind: StatementKind,
    class: StatementClass,
    endpoint: EndpointIdentity,
    query: String,
}

impl ExecutionContext {
    /// The statement's span. Drivers instrument the real execution with it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn class(&self) -> StatementClass {
        self.class
    }

    pub fn endpoint(&self) -> &EndpointIdentity {
        &self.endpoint
    }

    /// Normalized statement text.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Per-call context threaded by the driver through the hooks of one
/// statement.
///
/// A class set with [`with_class`](Self::with_class) is propagated to the
/// metrics `type` label; without one, statements are labeled
/// [`StatementClass::Primary`].
#[derive(Debug, Default)]
pub struct QueryContext {
    class: Option<StatementClass>,
    execution: Option<ExecutionContext>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, class: StatementClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn class(&self) -> Option<StatementClass> {
        self.class
    }

    /// The in-flight execution, if `before` ran and no terminal hook has
    /// consumed it yet.
    pub fn execution(&self) -> Option<&ExecutionContext> {
        self.execution.as_ref()
    }

    fn take_execution(&mut self, hook: &'static str) -> Result<ExecutionContext> {
        self.execution
            .take()
            .ok_or(Error::MissingExecutionContext { hook })
    }
}

/// The hook contract a driver wrapper calls into.
pub trait QueryHooks: Send + Sync {
    /// Pre-execution hook.
    fn before(&self, cx: QueryContext, query: &str, args: &[Value]) -> Result<QueryContext>;

    /// Post-success hook.
    fn after(&self, cx: QueryContext, query: &str, args: &[Value]) -> Result<QueryContext>;

    /// Post-error hook.
    ///
    /// Returns the error the caller must propagate: `None` when there is
    /// nothing to propagate (no error, or the driver's skip signal), else the
    /// original error unchanged. A failing hook hands the driver error back
    /// in [`ErrorHookFailure::driver_error`].
    ///
    /// Returning `Ok(None)` for a genuine error is observable:
    /// [`HookedConnection`](crate::HookedConnection) cannot return success
    /// for a failed statement, so it reports
    /// `DbErr::Custom("statement skipped by hooks")` instead.
    fn on_error<E: DriverError>(
        &self,
        cx: &mut QueryContext,
        err: Option<E>,
        query: &str,
        args: &[Value],
    ) -> std::result::Result<Option<E>, ErrorHookFailure<E>>;
}

/// A failed post-error hook, together with the driver error it was given.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ErrorHookFailure<E> {
    #[source]
    pub error: Error,
    /// The error the driver reported, to be propagated unchanged.
    pub driver_error: Option<E>,
}

/// Hooks that trace every statement and record it in [`QueryMetrics`].
///
/// # Example
///
/// ```rust
/// use sqlm::{MonitorConfig, QueryContext, QueryHooks, QueryMetrics, SqlHooks};
///
/// let metrics = QueryMetrics::new("shop").unwrap();
/// let hooks = SqlHooks::new(MonitorConfig::default(), metrics.clone());
///
/// let cx = hooks.before(QueryContext::new(), "SELECT * FROM t WHERE id IN (?,?)", &[]).unwrap();
/// // ... run the statement ...
/// hooks.after(cx, "SELECT * FROM t WHERE id IN (?,?)", &[]).unwrap();
///
/// assert_eq!(metrics.counts("SELECT * FROM t WHERE id IN ()", Default::default()).success, 1);
/// ```
#[derive(Debug, Clone)]
pub struct SqlHooks {
    config: Arc<MonitorConfig>,
    metrics: QueryMetrics,
}

impl SqlHooks {
    /// Create hooks recording into `metrics`.
    pub fn new(config: MonitorConfig, metrics: QueryMetrics) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
        }
    }

    /// Create hooks with fresh metrics under the configured namespace and
    /// register them in `registry`.
    pub fn with_registry(config: MonitorConfig, registry: &prometheus::Registry) -> Result<Self> {
        let metrics = QueryMetrics::new(&config.namespace)?;
        metrics.register(registry)?;
        Ok(Self::new(config, metrics))
    }

    /// Create hooks recording into [`QueryMetrics::global`].
    pub fn with_global_metrics(config: MonitorConfig) -> Self {
        Self::new(config, QueryMetrics::global().clone())
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    fn warn_if_slow(&self, query: &str, elapsed: Duration) {
        if elapsed > self.config.slow_query_threshold {
            tracing::warn!(
                query = %query,
                duration_ms = elapsed.as_millis() as i64,
                threshold_ms = self.config.slow_query_threshold.as_millis() as i64,
                "Slow query detected"
            );
        }
    }
}

impl Default for SqlHooks {
    fn default() -> Self {
        Self::with_global_metrics(MonitorConfig::default())
    }
}

impl QueryHooks for SqlHooks {
    fn before(&self, mut cx: QueryContext, query: &str, _args: &[Value]) -> Result<QueryContext> {
        let parsed = ParsedStatement::parse(query);
        let endpoint = self.config.endpoints.resolve(parsed.kind.is_read());
        let span = span::start(&self.config.service_name, parsed.kind, &endpoint, &parsed.normalized);

        if cx.execution.is_some() {
            tracing::debug!("replacing unfinished execution context");
        }
        cx.execution = Some(ExecutionContext {
            started: Instant::now(),
            span,
            kind: parsed.kind,
            class: cx.class.unwrap_or_default(),
            endpoint,
            query: parsed.normalized,
        });
        Ok(cx)
    }

    fn after(&self, mut cx: QueryContext, query: &str, _args: &[Value]) -> Result<QueryContext> {
        let execution = cx.take_execution("after")?;
        let label = normalize(query);
        let elapsed = execution.started.elapsed();

        self.warn_if_slow(&label, elapsed);
        span::finish_ok(execution.span, elapsed);

        self.metrics.store_total(&label, execution.class);
        self.metrics.store_success(&label, execution.class);
        self.metrics.store_latency(&label, elapsed, execution.class);
        Ok(cx)
    }

    fn on_error<E: DriverError>(
        &self,
        cx: &mut QueryContext,
        err: Option<E>,
        query: &str,
        _args: &[Value],
    ) -> std::result::Result<Option<E>, ErrorHookFailure<E>> {
        let err = match err {
            Some(err) if !err.is_skip() => err,
            _ => return Ok(None),
        };

        let execution = match cx.take_execution("on_error") {
            Ok(execution) => execution,
            Err(error) => {
                return Err(ErrorHookFailure {
                    error,
                    driver_error: Some(err),
                })
            }
        };
        let label = normalize(query);
        let elapsed = execution.started.elapsed();

        self.metrics.store_total(&label, execution.class);
        self.metrics.store_error(&label, execution.class);
        self.metrics.store_latency(&label, elapsed, execution.class);

        self.warn_if_slow(&label, elapsed);
        span::finish_err(execution.span, elapsed, &err);
        Ok(Some(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::Endpoints;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Skip,
        Failed(&'static str),
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Skip => f.write_str("skip"),
                TestError::Failed(msg) => f.write_str(msg),
            }
        }
    }

    impl DriverError for TestError {
        fn is_skip(&self) -> bool {
            matches!(self, TestError::Skip)
        }
    }

    fn hooks() -> SqlHooks {
        let config = MonitorConfig::default().with_endpoints(
            Endpoints::new(EndpointIdentity::new("h1", "d1", "u1"))
                .with_replica(EndpointIdentity::new("", "d2", "")),
        );
        SqlHooks::new(config, QueryMetrics::new("test").unwrap())
    }

    const SELECT: &str = "SELECT * FROM t WHERE id IN (?,?,?)";
    const SELECT_LABEL: &str = "SELECT * FROM t WHERE id IN ()";

    #[test]
    fn test_before_builds_execution_context() {
        let hooks = hooks();
        let cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let execution = cx.execution().unwrap();

        assert_eq!(execution.kind(), StatementKind::Select);
        assert_eq!(execution.class(), StatementClass::Primary);
        assert_eq!(execution.query(), SELECT_LABEL);
        assert_eq!(execution.endpoint(), &EndpointIdentity::new("h1", "d2", "u1"));
    }

    #[test]
    fn test_writes_route_to_primary() {
        let hooks = hooks();
        let cx = hooks
            .before(QueryContext::new(), "UPDATE t SET a = ? WHERE id = ?", &[])
            .unwrap();
        assert_eq!(
            cx.execution().unwrap().endpoint(),
            &EndpointIdentity::new("h1", "d1", "u1")
        );
    }

    #[test]
    fn test_success_path() {
        let hooks = hooks();
        let cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let cx = hooks.after(cx, SELECT, &[]).unwrap();
        assert!(cx.execution().is_none());

        let counts = hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary);
        assert_eq!((counts.total, counts.success, counts.error), (1, 1, 0));
        assert_eq!(counts.latency_samples, 1);
    }

    #[test]
    fn test_error_path_returns_original_error() {
        let hooks = hooks();
        let mut cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let err = hooks
            .on_error(&mut cx, Some(TestError::Failed("deadlock")), SELECT, &[])
            .unwrap();

        assert_eq!(err, Some(TestError::Failed("deadlock")));
        assert!(cx.execution().is_none());

        let counts = hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary);
        assert_eq!((counts.total, counts.success, counts.error), (1, 0, 1));
        assert_eq!(counts.latency_samples, 1);
    }

    #[test]
    fn test_skip_signal_is_not_recorded() {
        let hooks = hooks();
        let mut cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let err = hooks
            .on_error(&mut cx, Some(TestError::Skip), SELECT, &[])
            .unwrap();

        assert_eq!(err, None);
        assert!(cx.execution().is_some());
        assert_eq!(
            hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary),
            Default::default()
        );
    }

    #[test]
    fn test_absent_error_is_not_recorded() {
        let hooks = hooks();
        let mut cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let err = hooks.on_error::<TestError>(&mut cx, None, SELECT, &[]).unwrap();

        assert_eq!(err, None);
        assert_eq!(
            hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary).total,
            0
        );
    }

    #[test]
    fn test_propagated_class_labels_metrics() {
        let hooks = hooks();
        let cx = QueryContext::new().with_class(StatementClass::Replica);
        let cx = hooks.before(cx, SELECT, &[]).unwrap();
        hooks.after(cx, SELECT, &[]).unwrap();

        assert_eq!(
            hooks.metrics().counts(SELECT_LABEL, StatementClass::Replica).success,
            1
        );
        assert_eq!(
            hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary).total,
            0
        );
    }

    #[test]
    fn test_after_without_before_fails() {
        let hooks = hooks();
        let err = hooks.after(QueryContext::new(), SELECT, &[]).unwrap_err();
        assert!(matches!(err, Error::MissingExecutionContext { hook: "after" }));
    }

    #[test]
    fn test_on_error_without_before_fails() {
        let hooks = hooks();
        let err = hooks
            .on_error(&mut QueryContext::new(), Some(TestError::Failed("x")), SELECT, &[])
            .unwrap_err();
        assert!(matches!(err.error, Error::MissingExecutionContext { hook: "on_error" }));
        assert_eq!(err.driver_error, Some(TestError::Failed("x")));
    }

    #[test]
    fn test_context_is_consumed_once() {
        let hooks = hooks();
        let cx = hooks.before(QueryContext::new(), SELECT, &[]).unwrap();
        let cx = hooks.after(cx, SELECT, &[]).unwrap();
        assert!(hooks.after(cx, SELECT, &[]).is_err());

        assert_eq!(
            hooks.metrics().counts(SELECT_LABEL, StatementClass::Primary).total,
            1
        );
    }

    #[test]
    fn test_insert_label() {
        let hooks = hooks();
        let sql = "INSERT INTO t VALUES (1,2),(3,4)";
        let cx = hooks.before(QueryContext::new(), sql, &[]).unwrap();
        assert_eq!(cx.execution().unwrap().kind(), StatementKind::Other);
        hooks.after(cx, sql, &[]).unwrap();

        assert_eq!(
            hooks
                .metrics()
                .counts("INSERT INTO t VALUES (? ?)", StatementClass::Primary)
                .total,
            1
        );
    }
}
