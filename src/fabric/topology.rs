//! Declares the exchange/queue/binding topology of spec §4.3 as data so
//! `mod.rs` can assert it once at startup instead of scattering
//! `exchange_declare`/`queue_declare` calls across every producer/consumer.

#[derive(Debug, Clone, Copy)]
pub enum Overflow {
    DropHead,
    RejectPublish,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueSpec {
    pub name: &'static str,
    pub exchange: &'static str,
    pub routing_key: &'static str,
    pub ttl_secs: u64,
    pub max_length: u32,
    pub dlq_routed: bool,
    pub overflow: Overflow,
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeSpec {
    pub name: &'static str,
}

pub const EXCHANGES: &[ExchangeSpec] = &[
    ExchangeSpec { name: "mastertrade.market" },
    ExchangeSpec { name: "mastertrade.trading" },
    ExchangeSpec { name: "mastertrade.orders" },
    ExchangeSpec { name: "mastertrade.risk" },
    ExchangeSpec { name: "mastertrade.system" },
    ExchangeSpec { name: "mastertrade.dlx" },
];

pub const QUEUES: &[QueueSpec] = &[
    QueueSpec {
        name: "market_data",
        exchange: "mastertrade.market",
        routing_key: "market.data.*",
        ttl_secs: 60,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::DropHead,
    },
    QueueSpec {
        name: "ticker_updates",
        exchange: "mastertrade.market",
        routing_key: "ticker.*",
        ttl_secs: 10,
        max_length: 50_000,
        dlq_routed: false,
        overflow: Overflow::DropHead,
    },
    QueueSpec {
        name: "sentiment_data",
        exchange: "mastertrade.market",
        routing_key: "sentiment.*",
        ttl_secs: 300,
        max_length: 10_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "onchain_metrics",
        exchange: "mastertrade.market",
        routing_key: "onchain.*",
        ttl_secs: 300,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "whale_alerts",
        exchange: "mastertrade.market",
        routing_key: "whale.alert.*",
        ttl_secs: 600,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "trading_signals",
        exchange: "mastertrade.trading",
        routing_key: "signal.*",
        ttl_secs: 30,
        max_length: 10_000,
        dlq_routed: true,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "order_requests",
        exchange: "mastertrade.orders",
        routing_key: "order.request.*",
        ttl_secs: 60,
        max_length: 5_000,
        dlq_routed: true,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "order_updates",
        exchange: "mastertrade.orders",
        routing_key: "order.update.#",
        ttl_secs: 300,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "risk_checks",
        exchange: "mastertrade.risk",
        routing_key: "risk.check.*",
        ttl_secs: 30,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "system_notifications",
        exchange: "mastertrade.system",
        routing_key: "system.#",
        ttl_secs: 600,
        max_length: 100_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "risk_breaches",
        exchange: "mastertrade.risk",
        routing_key: "risk.breach.*",
        ttl_secs: 600,
        max_length: 10_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
    QueueSpec {
        name: "goal_events",
        exchange: "mastertrade.system",
        routing_key: "goal.*",
        ttl_secs: 600,
        max_length: 10_000,
        dlq_routed: false,
        overflow: Overflow::RejectPublish,
    },
];

pub const DLX_EXCHANGE: &str = "mastertrade.dlx";
pub const DLQ_TTL_SECS: u64 = 24 * 3600;

/// Prefetch count per queue family (spec §4.3).
pub fn prefetch_for(queue: &str) -> u16 {
    match queue {
        "order_requests" | "order_updates" => 1,
        "trading_signals" | "risk_checks" => 5,
        _ => 10,
    }
}

pub fn dlq_routing_key(queue: &str) -> String {
    format!("dlq.{queue}")
}
