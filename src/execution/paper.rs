//! Paper-fill simulation (spec §4.8: "simulate fill at latest ticker
//! price"). Adapted from the teacher's `VaultPaperLedger::apply_buy`/
//! `apply_sell` notional-to-shares conversion, stripped of its per-user
//! cash ledger since fills here settle straight into a typed `Position`.

use crate::error::MasterTradeError;
use crate::models::order::Order;
use crate::persistence::Persistence;
use rust_decimal::Decimal;

pub struct SimulatedFill {
    pub price: Decimal,
}

/// Paper orders fill immediately and in full at the latest recorded close;
/// there is no partial-fill or slippage model for the paper venue.
pub async fn simulate_fill(persistence: &Persistence, order: &Order) -> Result<SimulatedFill, MasterTradeError> {
    let price = match order.price {
        Some(limit_price) => limit_price,
        None => persistence
            .timeseries
            .latest_close(&order.symbol)
            .await?
            .ok_or_else(|| MasterTradeError::InvariantViolation(format!("no ticker price for {}", order.symbol)))?,
    };
    Ok(SimulatedFill { price })
}
