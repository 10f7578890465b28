//! Hot-path time-series accessors (spec §4.4).
//! Raw points land here at collection time; strategy generation and risk
//! tracking read back windows and roll-ups. Grounded on the same
//! `vault_db`-shaped "one method per query" layout as `relational.rs`, kept
//! in its own module because callers reason about it on a time axis rather
//! than by entity id.

use super::with_store_timeout;
use crate::error::MasterTradeError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone)]
pub struct OhlcvPoint {
    pub symbol: String,
    pub interval: String,
    pub ts: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone)]
pub struct SentimentPoint {
    pub source: String,
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub score: f64,
    pub volume: u64,
}

#[derive(Debug, Clone)]
pub struct OnchainFlowPoint {
    pub chain: String,
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub net_flow_usd: Decimal,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct WhaleFlowPoint {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub net_flow_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub symbol: String,
    pub interval: String,
    pub indicator: String,
    pub ts: DateTime<Utc>,
    pub value: f64,
}

#[derive(Clone)]
pub struct TimeSeriesStore {
    pool: PgPool,
}

impl TimeSeriesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_ohlcv(&self, p: &OhlcvPoint) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert ohlcv",
            sqlx::query(
                "INSERT INTO ohlcv (symbol, interval, ts, open, high, low, close, volume)
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                 ON CONFLICT (symbol, interval, ts) DO NOTHING",
            )
            .bind(&p.symbol)
            .bind(&p.interval)
            .bind(p.ts)
            .bind(p.open)
            .bind(p.high)
            .bind(p.low)
            .bind(p.close)
            .bind(p.volume)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    pub async fn recent_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        limit: i64,
    ) -> Result<Vec<OhlcvPoint>, MasterTradeError> {
        let rows = with_store_timeout(
            "recent ohlcv",
            sqlx::query(
                "SELECT symbol, interval, ts, open, high, low, close, volume FROM ohlcv
                 WHERE symbol = $1 AND interval = $2
                 ORDER BY ts DESC LIMIT $3",
            )
            .bind(symbol)
            .bind(interval)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| OhlcvPoint {
                symbol: r.get("symbol"),
                interval: r.get("interval"),
                ts: r.get("ts"),
                open: r.get("open"),
                high: r.get("high"),
                low: r.get("low"),
                close: r.get("close"),
                volume: r.get("volume"),
            })
            .collect())
    }

    /// Latest close across any interval, used by the risk gate to turn a
    /// sizing notional into a quantity.
    pub async fn latest_close(&self, symbol: &str) -> Result<Option<Decimal>, MasterTradeError> {
        let row = with_store_timeout(
            "latest close",
            sqlx::query("SELECT close FROM ohlcv WHERE symbol = $1 ORDER BY ts DESC LIMIT 1")
                .bind(symbol)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(row.map(|r| r.get("close")))
    }

    pub async fn insert_sentiment(&self, p: &SentimentPoint) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert sentiment",
            sqlx::query(
                "INSERT INTO sentiment_points (source, symbol, ts, score, volume)
                 VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(&p.source)
            .bind(&p.symbol)
            .bind(p.ts)
            .bind(p.score)
            .bind(p.volume as i64)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Most recent sentiment points for `symbol` across all sources, newest
    /// first. Feeds the signal aggregator's sentiment component (spec §4.5).
    pub async fn recent_sentiment(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<SentimentPoint>, MasterTradeError> {
        let rows = with_store_timeout(
            "recent sentiment",
            sqlx::query(
                "SELECT source, symbol, ts, score, volume FROM sentiment_points
                 WHERE symbol = $1
                 ORDER BY ts DESC LIMIT $2",
            )
            .bind(symbol)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SentimentPoint {
                source: r.get("source"),
                symbol: r.get("symbol"),
                ts: r.get("ts"),
                score: r.get("score"),
                volume: r.get::<i64, _>("volume") as u64,
            })
            .collect())
    }

    pub async fn insert_onchain_flow(&self, p: &OnchainFlowPoint) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert onchain flow",
            sqlx::query(
                "INSERT INTO onchain_flow_points (chain, symbol, ts, net_flow_usd, metadata)
                 VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(&p.chain)
            .bind(&p.symbol)
            .bind(p.ts)
            .bind(p.net_flow_usd)
            .bind(&p.metadata)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Most recent on-chain flow points for `symbol` across all chains,
    /// newest first. Feeds the signal aggregator's on-chain component.
    pub async fn recent_onchain_flow(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<OnchainFlowPoint>, MasterTradeError> {
        let rows = with_store_timeout(
            "recent onchain flow",
            sqlx::query(
                "SELECT chain, symbol, ts, net_flow_usd, metadata FROM onchain_flow_points
                 WHERE symbol = $1
                 ORDER BY ts DESC LIMIT $2",
            )
            .bind(symbol)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| OnchainFlowPoint {
                chain: r.get("chain"),
                symbol: r.get("symbol"),
                ts: r.get("ts"),
                net_flow_usd: r.get("net_flow_usd"),
                metadata: r.get("metadata"),
            })
            .collect())
    }

    pub async fn insert_whale_flow(&self, p: &WhaleFlowPoint) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert whale flow",
            sqlx::query(
                "INSERT INTO whale_flow_points (symbol, ts, net_flow_usd) VALUES ($1,$2,$3)",
            )
            .bind(&p.symbol)
            .bind(p.ts)
            .bind(p.net_flow_usd)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Net whale-flow pressure for `symbol` over the trailing window starting
    /// at `since`, used as the signal aggregator's institutional-flow
    /// component (spec §4.5 "whale-alert-derived pressure over trailing
    /// 1h"). `None` when no whale activity was recorded in the window.
    pub async fn recent_whale_pressure(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, MasterTradeError> {
        let row = with_store_timeout(
            "recent whale pressure",
            sqlx::query(
                "SELECT SUM(net_flow_usd) AS total, COUNT(*) AS n FROM whale_flow_points
                 WHERE symbol = $1 AND ts >= $2",
            )
            .bind(symbol)
            .bind(since)
            .fetch_one(&self.pool),
        )
        .await?;
        let count: i64 = row.get("n");
        if count == 0 {
            return Ok(None);
        }
        let total: Decimal = row.get("total");
        Ok(total.to_string().parse::<f64>().ok())
    }

    pub async fn insert_indicator(&self, p: &IndicatorPoint) -> Result<(), MasterTradeError> {
        with_store_timeout(
            "insert indicator",
            sqlx::query(
                "INSERT INTO indicator_points (symbol, interval, indicator, ts, value)
                 VALUES ($1,$2,$3,$4,$5)
                 ON CONFLICT (symbol, interval, indicator, ts) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(&p.symbol)
            .bind(&p.interval)
            .bind(&p.indicator)
            .bind(p.ts)
            .bind(p.value)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    /// Daily return roll-up over a continuous-aggregate-shaped view, used by
    /// risk tracking's goal-progress snapshot (spec §4.7).
    pub async fn daily_return_pct(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, MasterTradeError> {
        let rows = with_store_timeout(
            "daily return rollup",
            sqlx::query(
                "SELECT day, return_pct FROM daily_returns
                 WHERE symbol = $1 AND day >= $2
                 ORDER BY day ASC",
            )
            .bind(symbol)
            .bind(since)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("day"), r.get("return_pct")))
            .collect())
    }
}
