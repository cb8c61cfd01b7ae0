//! Opening hooked read-write and read-only MySQL pools.

use prometheus::core::Collector;
use prometheus::Registry;
use sea_orm::sqlx::MySqlPool;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::config::PoolOptions;
use crate::connection::HookedConnection;
use crate::error::Result;
use crate::hooks::SqlHooks;
use crate::pool::PoolStatsCollector;
use crate::routing::StatementClass;

/// The hooked pools opened by [`connect`].
#[derive(Debug)]
pub struct Connections {
    /// Read-write pool; statements are labeled `master`.
    pub rw: HookedConnection,
    /// Read-only pool, when a URL was given; statements are labeled `slave`.
    pub ro: Option<HookedConnection>,
}

fn connect_options(url: &str, pool: &PoolOptions) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url.to_owned());
    opts.max_connections(pool.max_open)
        .min_connections(pool.max_idle.min(pool.max_open))
        .idle_timeout(pool.max_idle_time)
        .sqlx_logging(false);
    opts
}

/// Register every collector, or none of them.
///
/// On failure the collectors registered so far are unregistered again and
/// the registration error is returned.
fn register_all<C>(registry: &Registry, collectors: Vec<C>) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    for (i, collector) in collectors.iter().enumerate() {
        if let Err(e) = registry.register(Box::new(collector.clone())) {
            for registered in &collectors[..i] {
                if let Err(e) = registry.unregister(Box::new(registered.clone())) {
                    tracing::warn!(error = %e, "Failed to unregister pool collector");
                }
            }
            return Err(e.into());
        }
    }
    Ok(())
}

async fn close_all(dbs: Vec<DatabaseConnection>) {
    for db in dbs {
        if let Err(e) = db.close().await {
            tracing::warn!(error = %e, "Failed to close database pool");
        }
    }
}

fn collector(
    namespace: &str,
    db_name: &str,
    db: &DatabaseConnection,
) -> Result<PoolStatsCollector<MySqlPool>> {
    PoolStatsCollector::new(namespace, db_name, db.get_mysql_connection_pool().clone())
}

/// Open the read-write pool and, when `ro_url` is given, the read-only pool.
///
/// Both pools run their statements through `hooks`. Each pool gets a
/// [`PoolStatsCollector`] registered in `registry`, named after the
/// configured database with a `-rw` / `-ro` suffix. Collectors are only
/// registered once every pool is open; if anything fails, the pools opened
/// so far are closed and `registry` is left as it was.
///
/// ```rust,ignore
/// let registry = prometheus::Registry::new();
/// let config = MonitorConfig::default()
///     .with_primary(EndpointIdentity::new("db-1:3306", "shop", "app"));
/// let hooks = SqlHooks::with_registry(config, &registry)?;
///
/// let dbs = sqlm::connect(&hooks, "mysql://app@db-1/shop", Some("mysql://app@db-2/shop"), &registry).await?;
/// ```
pub async fn connect(
    hooks: &SqlHooks,
    rw_url: &str,
    ro_url: Option<&str>,
    registry: &Registry,
) -> Result<Connections> {
    let config = hooks.config();

    let rw_name = format!("{}-rw", config.endpoints.primary.database);
    let ro_name = {
        let database = config
            .endpoints
            .replica
            .as_ref()
            .map(|r| r.database.as_str())
            .filter(|d| !d.is_empty())
            .unwrap_or(config.endpoints.primary.database.as_str());
        format!("{database}-ro")
    };

    let rw = Database::connect(connect_options(rw_url, &config.pool)).await?;
    let ro = match ro_url {
        Some(url) => match Database::connect(connect_options(url, &config.pool)).await {
            Ok(db) => Some(db),
            Err(e) => {
                close_all(vec![rw]).await;
                return Err(e.into());
            }
        },
        None => None,
    };

    let collectors = std::iter::once((&rw, rw_name.as_str()))
        .chain(ro.as_ref().map(|db| (db, ro_name.as_str())))
        .map(|(db, name)| collector(&config.namespace, name, db))
        .collect::<Result<Vec<_>>>()
        .and_then(|collectors| register_all(registry, collectors));
    if let Err(e) = collectors {
        close_all(std::iter::once(rw).chain(ro).collect()).await;
        return Err(e);
    }

    tracing::info!(db_name = %rw_name, max_open = config.pool.max_open, "Database pool opened");
    if ro.is_some() {
        tracing::info!(db_name = %ro_name, max_open = config.pool.max_open, "Database pool opened");
    }

    Ok(Connections {
        rw: HookedConnection::new(rw, hooks.clone()).with_class(StatementClass::Primary),
        ro: ro.map(|db| HookedConnection::new(db, hooks.clone()).with_class(StatementClass::Replica)),
    })
}
