//! MarketSignal — output of the aggregator (spec §3, §4.5)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
}

impl SignalStrength {
    /// `STRONG` iff confidence >= 0.7, `MODERATE` iff in [0.5, 0.7), else `WEAK`.
    pub fn classify(confidence: f64) -> Self {
        if confidence >= 0.7 {
            SignalStrength::Strong
        } else if confidence >= 0.5 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalComponent {
    pub score: f64,
    pub confidence: f64,
    pub age_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub action: SignalAction,
    pub confidence: f64,
    pub strength: SignalStrength,
    pub components: HashMap<String, SignalComponent>,
    pub weights_used: HashMap<String, f64>,
    pub fused_score: f64,
}

impl MarketSignal {
    /// `BUY`/`SELL` require confidence >= 0.65; otherwise `HOLD` (spec §3 invariant).
    pub fn classify_action(fused_score: f64, confidence: f64) -> SignalAction {
        if confidence < 0.65 {
            return SignalAction::Hold;
        }
        if fused_score > 0.1 {
            SignalAction::Buy
        } else if fused_score < -0.1 {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_boundaries() {
        assert_eq!(SignalStrength::classify(0.7), SignalStrength::Strong);
        assert_eq!(SignalStrength::classify(0.69999), SignalStrength::Moderate);
        assert_eq!(SignalStrength::classify(0.5), SignalStrength::Moderate);
        assert_eq!(SignalStrength::classify(0.49999), SignalStrength::Weak);
    }

    #[test]
    fn action_requires_confidence_threshold() {
        assert_eq!(
            MarketSignal::classify_action(0.5, 0.5),
            SignalAction::Hold,
            "confidence below 0.65 always HOLDs regardless of score"
        );
        assert_eq!(
            MarketSignal::classify_action(0.2, 0.8),
            SignalAction::Buy
        );
        assert_eq!(
            MarketSignal::classify_action(-0.2, 0.8),
            SignalAction::Sell
        );
        assert_eq!(
            MarketSignal::classify_action(0.05, 0.9),
            SignalAction::Hold,
            "|score| <= 0.1 is a HOLD band even at high confidence"
        );
    }
}
