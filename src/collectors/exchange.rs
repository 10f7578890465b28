//! Exchange streaming collector (Coinbase/Deribit/CME-shaped websocket feed).
//! Grounded on `scrapers::binance_session::SessionConfig`'s exponential
//! backoff policy, generalized to the spec's flat 1s,2s,4s,...,cap 60s
//! reconnect schedule and routed onto the fabric instead of an in-process
//! order book.

use super::traits::{Collector, HealthRecord, TimeRange};
use crate::error::MasterTradeError;
use crate::fabric::Fabric;
use crate::models::collector::CollectorHealth;
use crate::models::message::{MessageType, RawMessage};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct StreamStats {
    messages_received: AtomicU64,
    consecutive_failures: AtomicU64,
}

pub struct ExchangeCollector {
    name: String,
    ws_url: String,
    symbol: String,
    fabric: Fabric,
    stats: Arc<StreamStats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExchangeCollector {
    pub fn new(name: impl Into<String>, ws_url: impl Into<String>, symbol: impl Into<String>, fabric: Fabric) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            name: name.into(),
            ws_url: ws_url.into(),
            symbol: symbol.into(),
            fabric,
            stats: Arc::new(StreamStats::default()),
            shutdown_tx,
            shutdown_rx,
            task: Mutex::new(None),
        }
    }

    fn next_backoff(attempt: u32) -> Duration {
        let millis = RECONNECT_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt);
        Duration::from_millis(millis).min(RECONNECT_CAP)
    }

    async fn run_stream(
        name: String,
        ws_url: String,
        symbol: String,
        fabric: Fabric,
        stats: Arc<StreamStats>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return;
            }

            let connected = tokio::select! {
                res = connect_async(&ws_url) => res,
                _ = shutdown.changed() => return,
            };

            let (ws_stream, _) = match connected {
                Ok(pair) => pair,
                Err(e) => {
                    stats.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    let backoff = Self::next_backoff(attempt);
                    warn!(collector = %name, error = %e, backoff_ms = backoff.as_millis() as u64, "websocket connect failed");
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            };

            info!(collector = %name, "websocket connected");
            attempt = 0;
            stats.consecutive_failures.store(0, Ordering::Relaxed);

            let (_write, mut read) = ws_stream.split();
            loop {
                tokio::select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                                stats.messages_received.fetch_add(1, Ordering::Relaxed);
                                if let Err(err) = Self::handle_frame(&name, &symbol, &fabric, &text).await {
                                    warn!(collector = %name, error = %err, "failed to handle stream frame");
                                }
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(collector = %name, error = %e, "websocket stream error, reconnecting");
                                break;
                            }
                            None => {
                                warn!(collector = %name, "websocket stream closed, reconnecting");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(
        name: &str,
        symbol: &str,
        fabric: &Fabric,
        text: &str,
    ) -> Result<(), MasterTradeError> {
        let body: serde_json::Value = serde_json::from_str(text).map_err(|e| MasterTradeError::PermanentParse {
            source_name: name.to_string(),
            reason: e.to_string(),
        })?;

        let message = RawMessage::new(
            MessageType::Ticker,
            name.to_string(),
            format!("ticker.{symbol}"),
            body,
        );
        fabric.publish("mastertrade.market", &message).await
    }
}

#[async_trait]
impl Collector for ExchangeCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), MasterTradeError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        let handle = tokio::spawn(Self::run_stream(
            self.name.clone(),
            self.ws_url.clone(),
            self.symbol.clone(),
            self.fabric.clone(),
            self.stats.clone(),
            self.shutdown_rx.clone(),
        ));
        *task = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), MasterTradeError> {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.task.lock().take() {
            if let Err(e) = handle.await {
                error!(collector = %self.name, error = %e, "stream task join failed");
            }
        }
        Ok(())
    }

    /// Streaming collectors have nothing to poll; they are driven entirely
    /// by `start`'s background task.
    async fn poll_once(&self) -> Result<u64, MasterTradeError> {
        Ok(0)
    }

    async fn backfill(&self, _range: TimeRange) -> Result<u64, MasterTradeError> {
        Ok(0)
    }

    async fn health_check(&self) -> HealthRecord {
        let failures = self.stats.consecutive_failures.load(Ordering::Relaxed);
        let status = if failures == 0 {
            CollectorHealth::Healthy
        } else if failures < 5 {
            CollectorHealth::Degraded
        } else {
            CollectorHealth::Failed
        };
        HealthRecord {
            status,
            latency_ms: 0,
            records_collected: self.stats.messages_received.load(Ordering::Relaxed),
            error_message: None,
        }
    }
}
