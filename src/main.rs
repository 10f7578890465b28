//! MasterTrade process entrypoint.
//!
//! Spec §6's process topology is a contract, not a mandated binary layout:
//! at minimum one process per cluster, any two co-locatable in one binary.
//! This binary can run any subset of the seven clusters selected on the
//! command line, so the same build artifact serves a single-process dev
//! deployment and a seven-process production one.

use clap::{Parser, ValueEnum};
use mastertrade_core::alerts::AlertBus;
use mastertrade_core::api::{self, ApiState};
use mastertrade_core::auth::{AuthState, JwtHandler, UserStore};
use mastertrade_core::collectors::{self, defi::DefiCollector, exchange::ExchangeCollector, macro_source::MacroCollector, onchain::OnchainCollector, social::SocialCollector, Collector};
use mastertrade_core::config::Config;
use mastertrade_core::execution::Executor;
use mastertrade_core::fabric::Fabric;
use mastertrade_core::middleware::AuditLog;
use mastertrade_core::persistence::Persistence;
use mastertrade_core::risk::RiskGate;
use mastertrade_core::scheduler::Scheduler;
use mastertrade_core::signals::SignalAggregator;
use mastertrade_core::strategy::Orchestrator;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Symbols tracked end to end (collectors → signal aggregator → strategy
/// orchestrator) absent a per-symbol configuration surface; spec §6 leaves
/// the tracked universe as a deployment detail.
const TRACKED_SYMBOLS: &[&str] = &["BTC-USD", "ETH-USD", "SOL-USD"];

/// One of spec §6's seven process clusters. `--roles` takes a
/// comma-separated subset; omitting the flag runs every cluster in one
/// process, which is what a single-box dev deployment wants.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Collectors,
    SignalAggregator,
    StrategyOrchestrator,
    RiskGate,
    OrderExecutor,
    AlertBus,
    ControlApi,
}

const ALL_ROLES: &[Role] = &[
    Role::Collectors,
    Role::SignalAggregator,
    Role::StrategyOrchestrator,
    Role::RiskGate,
    Role::OrderExecutor,
    Role::AlertBus,
    Role::ControlApi,
];

#[derive(Parser, Debug)]
#[command(name = "mastertrade", about = "MasterTrade core runtime")]
struct Cli {
    /// Clusters to run in this process. Repeat or comma-separate; defaults
    /// to every cluster.
    #[arg(long, value_enum, value_delimiter = ',', env = "MASTERTRADE_ROLES")]
    roles: Vec<Role>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let roles: Vec<Role> = if cli.roles.is_empty() { ALL_ROLES.to_vec() } else { cli.roles };
    info!(roles = ?roles, "starting mastertrade");

    let config = Config::from_env()?;

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;

    let persistence = Persistence::connect(&config.db_url, &config.cache_url).await?;
    persistence.migrate().await?;
    info!("database migrations applied");

    let fabric = Fabric::connect(&config.broker_url).await?;
    let scheduler = Scheduler::new(persistence.relational.pool().clone());

    let user_store = Arc::new(UserStore::new(persistence.relational.pool().clone()));
    user_store.ensure_default_admin().await?;
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store, jwt_handler.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut tasks = Vec::new();

    if roles.contains(&Role::Collectors) {
        spawn_collectors(&config, &fabric, &persistence, &mut tasks, shutdown_rx.clone());
    }

    if roles.contains(&Role::SignalAggregator) {
        let aggregator = SignalAggregator::new(
            persistence.clone(),
            fabric.clone(),
            TRACKED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
        );
        let shutdown = shutdown_rx.clone();
        let cadence = config.signal_update_interval;
        tasks.push(tokio::spawn(async move {
            aggregator.run_loop(cadence, shutdown).await;
        }));
    }

    let orchestrator = Orchestrator::new(
        persistence.clone(),
        fabric.clone(),
        scheduler.clone(),
        config.max_active_strategies,
        config.backtest_parallelism,
        rand::random(),
    );

    if roles.contains(&Role::StrategyOrchestrator) {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = orchestrator.run(shutdown).await {
                error!(error = %err, "strategy orchestrator exited");
            }
        }));
    }

    if roles.contains(&Role::RiskGate) {
        let risk_gate = Arc::new(RiskGate::new(persistence.clone(), fabric.clone(), scheduler.clone()));
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            risk_gate.run_goal_snapshot_loop(shutdown).await;
        }));
    }

    if roles.contains(&Role::OrderExecutor) {
        let executor = Executor::new(persistence.clone(), fabric.clone());
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = executor.run_loop(shutdown).await {
                error!(error = %err, "order executor exited");
            }
        }));
    }

    if roles.contains(&Role::AlertBus) {
        let alert_bus = AlertBus::new(persistence.clone(), fabric.clone(), config.alert_channels.clone());
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = alert_bus.run_loop(shutdown).await {
                error!(error = %err, "alert bus exited");
            }
        }));
    }

    if roles.contains(&Role::ControlApi) {
        let audit = Arc::new(AuditLog::new(persistence.clone(), fabric.clone()));
        let api_state = ApiState {
            persistence: persistence.clone(),
            orchestrator: orchestrator.clone(),
            audit,
            jwt_handler,
            auth: auth_state,
            prometheus: prometheus_handle,
        };
        let app = api::router(api_state);
        let addr = format!("0.0.0.0:{}", config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "control API listening");

        let mut shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            );
            let result = serve
                .with_graceful_shutdown(async move {
                    let _ = shutdown.changed().await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "control API server error");
            }
        }));
    }

    if tasks.is_empty() {
        warn!("no roles selected, process has nothing to run");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping all clusters");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

/// Spawns one collector per enabled group (spec §6's `*_COLLECTION_ENABLED`
/// switches), each on its own poll loop. Streaming collectors (exchange)
/// start their own background task from `Collector::start` and are polled
/// on a long interval purely to keep health reporting flowing.
fn spawn_collectors(
    config: &Config,
    fabric: &Fabric,
    persistence: &Persistence,
    tasks: &mut Vec<tokio::task::JoinHandle<()>>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    const STREAM_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
    const ONCHAIN_POLL_INTERVAL: Duration = Duration::from_secs(120);
    const SOCIAL_POLL_INTERVAL: Duration = Duration::from_secs(180);
    const MACRO_POLL_INTERVAL: Duration = Duration::from_secs(3600);
    const DEFI_POLL_INTERVAL: Duration = Duration::from_secs(300);

    if config.collector_groups.exchange_enabled {
        for symbol in TRACKED_SYMBOLS {
            let name = format!("exchange-{symbol}");
            let ws_url = format!("wss://ws-feed.exchange.example.com/{symbol}");
            let collector: Arc<dyn Collector> =
                Arc::new(ExchangeCollector::new(name.clone(), ws_url, *symbol, fabric.clone()));
            spawn_one(collector, name, persistence.clone(), STREAM_HEALTH_INTERVAL, tasks, shutdown.clone());
        }
    }

    if config.collector_groups.onchain_enabled {
        if let Some(key) = &config.collector_credentials.moralis_api_key {
            let name = "onchain-moralis".to_string();
            let collector: Arc<dyn Collector> = Arc::new(OnchainCollector::new(
                name.clone(),
                "https://deep-index.moralis.io/api/v2.2",
                key.clone(),
                TRACKED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                fabric.clone(),
                persistence.clone(),
            ));
            spawn_one(collector, name, persistence.clone(), ONCHAIN_POLL_INTERVAL, tasks, shutdown.clone());
        } else {
            warn!("onchain collection enabled but MORALIS_API_KEY not set, skipping");
        }
    }

    if config.collector_groups.social_enabled {
        if let Some(key) = &config.collector_credentials.lunarcrush_api_key {
            let name = "social-lunarcrush".to_string();
            let collector: Arc<dyn Collector> = Arc::new(SocialCollector::new(
                name.clone(),
                "https://lunarcrush.com/api4/public",
                key.clone(),
                TRACKED_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                fabric.clone(),
                persistence.clone(),
            ));
            spawn_one(collector, name, persistence.clone(), SOCIAL_POLL_INTERVAL, tasks, shutdown.clone());
        } else {
            warn!("social collection enabled but LUNARCRUSH_API_KEY not set, skipping");
        }
    }

    if config.collector_groups.macro_enabled {
        if let Some(key) = &config.collector_credentials.fred_api_key {
            let name = "macro-fred".to_string();
            let collector: Arc<dyn Collector> = Arc::new(MacroCollector::new(
                name.clone(),
                "https://api.stlouisfed.org/fred",
                key.clone(),
                vec!["DFF".to_string(), "CPIAUCSL".to_string()],
                fabric.clone(),
                persistence.clone(),
            ));
            spawn_one(collector, name, persistence.clone(), MACRO_POLL_INTERVAL, tasks, shutdown.clone());
        } else {
            warn!("macro collection enabled but FRED_API_KEY not set, skipping");
        }
    }

    if config.collector_groups.defi_enabled {
        if let Some(key) = &config.collector_credentials.thegraph_api_key {
            let name = "defi-thegraph".to_string();
            let collector: Arc<dyn Collector> = Arc::new(DefiCollector::new(
                name.clone(),
                "https://gateway.thegraph.com/api",
                key.clone(),
                vec!["uniswap-v3".to_string(), "aave-v3".to_string()],
                fabric.clone(),
                persistence.clone(),
            ));
            spawn_one(collector, name, persistence.clone(), DEFI_POLL_INTERVAL, tasks, shutdown.clone());
        } else {
            warn!("defi collection enabled but THEGRAPH_API_KEY not set, skipping");
        }
    }
}

fn spawn_one(
    collector: Arc<dyn Collector>,
    name: String,
    persistence: Persistence,
    poll_interval: Duration,
    tasks: &mut Vec<tokio::task::JoinHandle<()>>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let start_collector = collector.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(err) = start_collector.start().await {
            error!(collector = %name, error = %err, "collector failed to start");
            return;
        }
        collectors::run_poll_loop(start_collector, name, persistence, poll_interval, shutdown).await;
    }));
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mastertrade_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
