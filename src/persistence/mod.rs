//! Persistence layer (spec §4.4, C4)
//! Mission: typed accessors over a relational authoritative store, a
//! time-series hot path, and a bounded cache — the only three places any
//! component is allowed to write. Cross-component access is read-only via
//! these accessors (§4.4 invariant).
//!
//! Grounded on `vault::vault_db::VaultDb`'s shape (a thin struct wrapping a
//! pooled connection, one method per query), generalized from `rusqlite` to
//! `sqlx`/`redis` per `SPEC_FULL.md` §10.3.

pub mod cache;
pub mod relational;
pub mod timeseries;

use crate::error::MasterTradeError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub use cache::CacheStore;
pub use relational::RelationalStore;
pub use timeseries::TimeSeriesStore;

/// Global singleton handles, constructed once at process start (§9) and
/// passed explicitly into every component that needs persistence.
#[derive(Clone)]
pub struct Persistence {
    pub relational: RelationalStore,
    pub timeseries: TimeSeriesStore,
    pub cache: CacheStore,
}

impl Persistence {
    pub async fn connect(db_url: &str, cache_url: &str) -> Result<Self, MasterTradeError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(60))
            .connect(db_url)
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "postgres connect".into(),
                source: e.into(),
            })?;

        let cache = CacheStore::connect(cache_url).await?;

        Ok(Self {
            relational: RelationalStore::new(pool.clone()),
            timeseries: TimeSeriesStore::new(pool),
            cache,
        })
    }

    /// Forward-only, numbered, idempotent migrations (§6).
    pub async fn migrate(&self) -> Result<(), MasterTradeError> {
        sqlx::migrate!("./migrations")
            .run(self.relational.pool())
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "migrate".into(),
                source: e.into(),
            })
    }
}

/// DB calls budget (spec §5 Timeouts: "DB calls 60s").
pub const DB_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Wrap a store call with the §5 timeout and fold the timeout into the
/// `Infrastructure.Store` tag.
pub async fn with_store_timeout<T, F>(what: &str, fut: F) -> Result<T, MasterTradeError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(DB_CALL_TIMEOUT, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(MasterTradeError::InfrastructureStore {
            what: what.to_string(),
            source: e.into(),
        }),
        Err(_) => Err(MasterTradeError::InfrastructureStore {
            what: what.to_string(),
            source: anyhow::anyhow!("db call exceeded {:?}", DB_CALL_TIMEOUT),
        }),
    }
}
