//! Hooked database connection wrapper.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    ExecResult, IsolationLevel, QueryResult, Statement, StreamTrait, TransactionError,
    TransactionTrait, Value,
};
use tracing::{Instrument, Span};

use crate::config::MonitorConfig;
use crate::hooks::{QueryContext, QueryHooks, SqlHooks};
use crate::routing::StatementClass;

/// A SeaORM `DatabaseConnection` whose statements run through [`QueryHooks`].
///
/// Implements `ConnectionTrait`, `StreamTrait` and `TransactionTrait`, so it
/// drops in wherever a `DatabaseConnection` is used. Every `execute`,
/// `execute_unprepared`, `query_one`, `query_all` and `stream` call drives
/// the pre-execution hook, then the success or error hook. The inner call is
/// instrumented with the statement's span.
///
/// Statements run inside a transaction obtained from `begin` go straight to
/// the driver and are not hooked.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::Database;
/// use sqlm::{HookedConnection, MonitorConfig, SqlHooks, StatementClass};
///
/// let registry = prometheus::Registry::new();
/// let hooks = SqlHooks::with_registry(MonitorConfig::default(), &registry)?;
///
/// let db = Database::connect("mysql://app@db-ro/shop").await?;
/// let replica = HookedConnection::new(db, hooks).with_class(StatementClass::Replica);
///
/// let users = Users::find().all(&replica).await?;
/// ```
#[derive(Debug)]
pub struct HookedConnection<H = SqlHooks> {
    inner: DatabaseConnection,
    hooks: H,
    class: Option<StatementClass>,
}

impl<H: QueryHooks> HookedConnection<H> {
    /// Wrap a connection with the given hooks.
    pub fn new(connection: DatabaseConnection, hooks: H) -> Self {
        Self {
            inner: connection,
            hooks,
            class: None,
        }
    }

    /// Label every statement run through this connection with `class`.
    pub fn with_class(mut self, class: StatementClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    pub fn into_inner(self) -> DatabaseConnection {
        self.inner
    }

    fn context(&self) -> QueryContext {
        match self.class {
            Some(class) => QueryContext::new().with_class(class),
            None => QueryContext::new(),
        }
    }

    /// Run `fut` between the pre-execution and terminal hooks.
    ///
    /// Hook failures are logged and never replace the driver's own result.
    /// A driver error the error hook declines to return is reported as
    /// `DbErr::Custom("statement skipped by hooks")`.
    async fn observe<T, F>(&self, sql: &str, args: &[Value], fut: F) -> Result<T, DbErr>
    where
        F: Future<Output = Result<T, DbErr>> + Send,
        T: Send,
    {
        let mut cx = match self.hooks.before(self.context(), sql, args) {
            Ok(cx) => cx,
            Err(e) => {
                tracing::error!(error = %e, "pre-execution hook failed");
                return fut.await;
            }
        };
        let span = cx
            .execution()
            .map(|execution| execution.span().clone())
            .unwrap_or_else(Span::none);

        match fut.instrument(span).await {
            Ok(value) => {
                if let Err(e) = self.hooks.after(cx, sql, args) {
                    tracing::error!(error = %e, "post-success hook failed");
                }
                Ok(value)
            }
            Err(err) if cx.execution().is_none() => Err(err),
            Err(err) => match self.hooks.on_error(&mut cx, Some(err), sql, args) {
                Ok(Some(err)) => Err(err),
                Ok(None) => Err(DbErr::Custom("statement skipped by hooks".to_string())),
                Err(failure) => {
                    tracing::error!(error = %failure.error, "post-error hook failed");
                    Err(failure.driver_error.unwrap_or_else(|| failure.error.into()))
                }
            },
        }
    }
}

impl HookedConnection<SqlHooks> {
    /// Wrap a connection with default configuration, recording into
    /// [`QueryMetrics::global`](crate::QueryMetrics::global).
    pub fn wrap(connection: DatabaseConnection) -> Self {
        Self::new(connection, SqlHooks::default())
    }
}

impl From<DatabaseConnection> for HookedConnection<SqlHooks> {
    fn from(connection: DatabaseConnection) -> Self {
        Self::wrap(connection)
    }
}

impl<H> AsRef<DatabaseConnection> for HookedConnection<H> {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.inner
    }
}

fn statement_args(stmt: &Statement) -> Vec<Value> {
    stmt.values
        .as_ref()
        .map(|values| values.0.clone())
        .unwrap_or_default()
}

#[async_trait]
impl<H: QueryHooks> ConnectionTrait for HookedConnection<H> {
    fn get_database_backend(&self) -> DbBackend {
        self.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let sql = stmt.sql.clone();
        let args = statement_args(&stmt);
        self.observe(&sql, &args, self.inner.execute(stmt)).await
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        self.observe(sql, &[], self.inner.execute_unprepared(sql))
            .await
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let args = statement_args(&stmt);
        self.observe(&sql, &args, self.inner.query_one(stmt)).await
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let sql = stmt.sql.clone();
        let args = statement_args(&stmt);
        self.observe(&sql, &args, self.inner.query_all(stmt)).await
    }

    fn support_returning(&self) -> bool {
        self.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.inner.is_mock_connection()
    }
}

impl<H: QueryHooks> StreamTrait for HookedConnection<H> {
    type Stream<'a>
        = <DatabaseConnection as StreamTrait>::Stream<'a>
    where
        Self: 'a;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let sql = stmt.sql.clone();
            let args = statement_args(&stmt);
            self.observe(&sql, &args, self.inner.stream(stmt)).await
        })
    }
}

#[async_trait]
impl<H: QueryHooks> TransactionTrait for HookedConnection<H> {
    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        self.inner.begin().await
    }

    async fn begin_with_config(
        &self,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<DatabaseTransaction, DbErr> {
        self.inner
            .begin_with_config(isolation_level, access_mode)
            .await
    }

    async fn transaction<F, T, E>(&self, callback: F) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        self.inner.transaction(callback).await
    }

    async fn transaction_with_config<F, T, E>(
        &self,
        callback: F,
        isolation_level: Option<IsolationLevel>,
        access_mode: Option<AccessMode>,
    ) -> Result<T, TransactionError<E>>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>
            + Send,
        T: Send,
        E: std::fmt::Display + std::fmt::Debug + Send,
    {
        self.inner
            .transaction_with_config(callback, isolation_level, access_mode)
            .await
    }
}

/// Extension trait for wrapping database connections with hooks.
pub trait HookedExt {
    /// Wrap this connection with default hooks.
    fn with_hooks(self) -> HookedConnection;

    /// Wrap this connection with hooks built from `config`, recording into
    /// the global metrics.
    fn with_hooks_config(self, config: MonitorConfig) -> HookedConnection;
}

impl HookedExt for DatabaseConnection {
    fn with_hooks(self) -> HookedConnection {
        HookedConnection::wrap(self)
    }

    fn with_hooks_config(self, config: MonitorConfig) -> HookedConnection {
        HookedConnection::new(self, SqlHooks::with_global_metrics(config))
    }
}
