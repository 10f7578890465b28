//! Core data model (spec §3)
//! Mission: typed records per entity, a narrow open-schema `metadata` map,
//! and a tagged-variant wire envelope for everything on the bus.

pub mod alert;
pub mod collector;
pub mod goal;
pub mod message;
pub mod order;
pub mod signal;
pub mod strategy;

pub use alert::{Alert, AlertSeverity, AlertStatus};
pub use collector::{BreakerState, CollectorState, CollectorStats, SourceKind};
pub use goal::{FinancialGoal, GoalProgress, GoalStatus, GoalType, RealizedProfitEntry};
pub use message::{MessageType, RawMessage};
pub use order::{Order, OrderEnvironment, OrderSide, OrderStatus, OrderType, Position};
pub use signal::{MarketSignal, SignalAction, SignalComponent, SignalStrength};
pub use strategy::{BacktestResult, Strategy, StrategyStatus};
