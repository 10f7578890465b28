//! Collector framework (spec §4.2, C2).
//! Each concrete collector owns one rate limiter and one breaker keyed by
//! its name, and is driven by a shared cooperative poll loop so that no
//! single collector can starve the others of CPU time.

pub mod defi;
pub mod exchange;
pub mod http;
pub mod macro_source;
pub mod onchain;
pub mod social;
pub mod traits;

pub use traits::{Collector, HealthRecord, TimeRange};

use crate::error::MasterTradeError;
use crate::models::collector::{CollectorHealth, CollectorState};
use crate::persistence::Persistence;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// Collectors yield cooperatively; no single cycle may hold the executor
/// longer than this before awaiting something (spec §4.2 "never block on
/// persistence or the fabric for more than 5 seconds").
pub const STORE_OR_PUBLISH_DEADLINE: Duration = Duration::from_secs(5);

/// Drives one collector's `poll_once` on its configured interval until
/// `shutdown` fires, persisting health and retrying store/publish failures
/// once per spec §4.2's failure semantics.
pub async fn run_poll_loop(
    collector: Arc<dyn Collector>,
    state_name: String,
    persistence: Persistence,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(collector = %state_name, "poll loop shutting down");
                    let _ = collector.stop().await;
                    return;
                }
            }
        }

        let outcome = tokio::time::timeout(STORE_OR_PUBLISH_DEADLINE * 2, collector.poll_once()).await;
        let health = collector.health_check().await;

        match outcome {
            Ok(Ok(count)) => {
                info!(collector = %state_name, records = count, "poll cycle ok");
            }
            Ok(Err(err)) => {
                warn!(collector = %state_name, error = %err, "poll cycle failed");
            }
            Err(_) => {
                error!(collector = %state_name, "poll cycle exceeded deadline");
            }
        }

        if let Err(err) = persist_health(&persistence, &state_name, &health).await {
            error!(collector = %state_name, error = %err, "failed to persist collector health");
        }
    }
}

async fn persist_health(
    persistence: &Persistence,
    name: &str,
    health: &HealthRecord,
) -> Result<(), MasterTradeError> {
    let cached = persistence
        .cache
        .get(&format!("collector_state:{name}"))
        .await?;

    let mut state: CollectorState = match cached {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| {
            CollectorState::new(name, crate::models::collector::SourceKind::Market)
        }),
        None => CollectorState::new(name, crate::models::collector::SourceKind::Market),
    };

    state.stats.total_polls += 1;
    state.stats.total_records_collected += health.records_collected;
    if matches!(health.status, CollectorHealth::Failed | CollectorHealth::Degraded) {
        state.stats.total_errors += 1;
    }
    if matches!(health.status, CollectorHealth::Healthy) {
        state.last_ok_at = Some(chrono::Utc::now());
    }

    let payload = serde_json::to_string(&state).map_err(|e| MasterTradeError::PermanentParse {
        source_name: "CollectorState".into(),
        reason: e.to_string(),
    })?;
    persistence
        .cache
        .set_ex(&format!("collector_state:{name}"), &payload, Duration::from_secs(24 * 3600))
        .await?;
    persistence.relational.upsert_collector_state(&state).await
}
