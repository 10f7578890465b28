//! Bounded cache tier (spec §4.4): restart-survival state for rate limiters
//! and breakers, the `signals:recent` ring buffer, and short-lived
//! query-result caching. Grounded on the same accessor shape as
//! `relational.rs`, swapped onto `redis`'s async `ConnectionManager` per
//! `SPEC_FULL.md` §10.3.

use crate::error::MasterTradeError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// `signals:recent` is capped at this many entries (spec §4.5).
pub const SIGNALS_RECENT_CAP: isize = 1000;
const SIGNALS_RECENT_TTL: u64 = 24 * 3600;
const RATELIMIT_STATE_TTL: u64 = 24 * 3600;
const BREAKER_STATE_TTL: u64 = 24 * 3600;
const QUERY_CACHE_TTL: u64 = 300;

#[derive(Clone)]
pub struct CacheStore {
    conn: ConnectionManager,
}

impl CacheStore {
    pub async fn connect(url: &str) -> Result<Self, MasterTradeError> {
        let client = redis::Client::open(url).map_err(|e| MasterTradeError::InfrastructureStore {
            what: "redis client open".into(),
            source: e.into(),
        })?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| MasterTradeError::InfrastructureStore {
                what: "redis connect".into(),
                source: e.into(),
            })?;
        Ok(Self { conn })
    }

    fn map_err(what: &str, e: redis::RedisError) -> MasterTradeError {
        MasterTradeError::InfrastructureStore {
            what: what.to_string(),
            source: e.into(),
        }
    }

    // --- generic string / TTL -------------------------------------------

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(|e| Self::map_err("set_ex", e))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| Self::map_err("get", e))
    }

    pub async fn del(&self, key: &str) -> Result<(), MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| Self::map_err("del", e))
    }

    pub async fn incr(&self, key: &str) -> Result<i64, MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(|e| Self::map_err("incr", e))
    }

    // --- rate-limiter / breaker restart-survival state -------------------

    /// Key `ratelimit:{collector}:{endpoint}`, 24h TTL (spec §4.1).
    pub async fn save_ratelimit_state(
        &self,
        collector: &str,
        endpoint: &str,
        current_rate_per_sec: f64,
    ) -> Result<(), MasterTradeError> {
        self.set_ex(
            &format!("ratelimit:{collector}:{endpoint}"),
            &current_rate_per_sec.to_string(),
            Duration::from_secs(RATELIMIT_STATE_TTL),
        )
        .await
    }

    pub async fn load_ratelimit_state(
        &self,
        collector: &str,
        endpoint: &str,
    ) -> Result<Option<f64>, MasterTradeError> {
        let raw = self.get(&format!("ratelimit:{collector}:{endpoint}")).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    /// Key `breaker:{collector}`, 24h TTL.
    pub async fn save_breaker_state(
        &self,
        collector: &str,
        state_json: &str,
    ) -> Result<(), MasterTradeError> {
        self.set_ex(
            &format!("breaker:{collector}"),
            state_json,
            Duration::from_secs(BREAKER_STATE_TTL),
        )
        .await
    }

    pub async fn load_breaker_state(&self, collector: &str) -> Result<Option<String>, MasterTradeError> {
        self.get(&format!("breaker:{collector}")).await
    }

    // --- signals:recent sorted set ---------------------------------------

    /// Append a signal (scored by unix-millis timestamp), trim to the cap,
    /// and refresh the key TTL — the bounded recent-signal buffer read by
    /// aggregation and the control API (spec §4.5).
    pub async fn push_recent_signal(
        &self,
        payload: &str,
        score_millis: i64,
    ) -> Result<(), MasterTradeError> {
        let mut conn = self.conn.clone();
        let key = "signals:recent";
        let () = conn
            .zadd(key, payload, score_millis)
            .await
            .map_err(|e| Self::map_err("zadd signals:recent", e))?;
        let () = conn
            .zremrangebyrank(key, 0, -(SIGNALS_RECENT_CAP + 1))
            .await
            .map_err(|e| Self::map_err("trim signals:recent", e))?;
        conn.expire::<_, ()>(key, SIGNALS_RECENT_TTL as i64)
            .await
            .map_err(|e| Self::map_err("expire signals:recent", e))
    }

    pub async fn recent_signals(&self, limit: isize) -> Result<Vec<String>, MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.zrevrange("signals:recent", 0, limit.max(1) - 1)
            .await
            .map_err(|e| Self::map_err("zrevrange signals:recent", e))
    }

    pub async fn recent_signals_depth(&self) -> Result<i64, MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.zcard("signals:recent")
            .await
            .map_err(|e| Self::map_err("zcard signals:recent", e))
    }

    // --- query-result cache -------------------------------------------------

    pub async fn cache_query_result(&self, key: &str, value: &str) -> Result<(), MasterTradeError> {
        self.set_ex(
            &format!("qcache:{key}"),
            value,
            Duration::from_secs(QUERY_CACHE_TTL),
        )
        .await
    }

    pub async fn cached_query_result(&self, key: &str) -> Result<Option<String>, MasterTradeError> {
        self.get(&format!("qcache:{key}")).await
    }

    // --- hash helpers --------------------------------------------------------

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| Self::map_err("hset", e))
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, MasterTradeError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(|e| Self::map_err("hget", e))
    }
}
