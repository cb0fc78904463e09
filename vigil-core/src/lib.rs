//! Fundamental data types shared across the vigil workspace.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod buffer;
pub use buffer::RollingBuffer;

/// Alias used for human-readable market symbols (e.g., `ETH`).
pub type Symbol = String;

/// Divisor floor used when normalizing by account equity.
pub const EQUITY_EPSILON: f64 = 1e-9;

/// Direction of an open perpetual position.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Price-delta multiplier: +1 for longs, -1 for shorts.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// One complete snapshot of an open position at a poll instant.
///
/// Produced by the snapshotter, pushed to the per-symbol rolling buffer, and
/// never mutated afterwards. Derived fields (`pnl_pct_of_equity`,
/// `dist_to_liquidation_pct`) are computed once at snapshot time.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PositionTick {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Position size in contracts (base units).
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    /// Unrealized PnL as a percentage of account equity.
    pub pnl_pct_of_equity: f64,
    pub account_equity: f64,
    pub margin_used: f64,
    pub liquidation_price: f64,
    /// Distance from mark to liquidation, percent of mark. `+inf` when the
    /// inputs are unusable.
    pub dist_to_liquidation_pct: f64,
    pub funding_rate: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

impl PositionTick {
    /// Compact form embedded in journal records.
    #[must_use]
    pub fn summary(&self) -> TickSummary {
        TickSummary {
            timestamp: self.timestamp,
            symbol: self.symbol.clone(),
            side: self.side,
            size: self.size,
            entry_price: self.entry_price,
            mark_price: self.mark_price,
            pnl_pct_of_equity: self.pnl_pct_of_equity,
            dist_to_liquidation_pct: self.dist_to_liquidation_pct,
            stop_loss_price: self.stop_loss_price,
            take_profit_price: self.take_profit_price,
        }
    }
}

/// Trimmed-down snapshot attached to journal records.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TickSummary {
    pub timestamp: i64,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub pnl_pct_of_equity: f64,
    pub dist_to_liquidation_pct: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
}

/// The mechanical conditions that justify consulting the advisor.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    PositionOpened,
    PositionClosed,
    StopMissing,
    PnlShift,
    ApproachingStop,
    ApproachingTp,
    LiquidationProximity,
    FundingFlip,
    FundingSpike,
    VolatilitySpike,
    TimeCeiling,
}

impl Trigger {
    pub const ALL: [Trigger; 11] = [
        Trigger::PositionOpened,
        Trigger::PositionClosed,
        Trigger::StopMissing,
        Trigger::PnlShift,
        Trigger::ApproachingStop,
        Trigger::ApproachingTp,
        Trigger::LiquidationProximity,
        Trigger::FundingFlip,
        Trigger::FundingSpike,
        Trigger::VolatilitySpike,
        Trigger::TimeCeiling,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PositionOpened => "position_opened",
            Self::PositionClosed => "position_closed",
            Self::StopMissing => "stop_missing",
            Self::PnlShift => "pnl_shift",
            Self::ApproachingStop => "approaching_stop",
            Self::ApproachingTp => "approaching_tp",
            Self::LiquidationProximity => "liquidation_proximity",
            Self::FundingFlip => "funding_flip",
            Self::FundingSpike => "funding_spike",
            Self::VolatilitySpike => "volatility_spike",
            Self::TimeCeiling => "time_ceiling",
        }
    }

    /// Built-in per-trigger cooldown. `None` means the generic fallback from
    /// configuration applies.
    #[must_use]
    pub fn default_cooldown(self) -> Option<Duration> {
        let secs = match self {
            Self::PositionOpened | Self::PositionClosed | Self::TimeCeiling => 0,
            Self::StopMissing | Self::LiquidationProximity => 60,
            Self::ApproachingStop | Self::ApproachingTp => 120,
            Self::PnlShift | Self::VolatilitySpike => 180,
            Self::FundingFlip | Self::FundingSpike => 600,
        };
        Some(Duration::from_secs(secs))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A trigger that fired on a tick, with a human-readable detail line for the
/// advisor prompt and the journal.
#[derive(Clone, Debug, PartialEq)]
pub struct FiredTrigger {
    pub trigger: Trigger,
    pub detail: String,
}

impl FiredTrigger {
    pub fn new(trigger: Trigger, detail: impl Into<String>) -> Self {
        Self {
            trigger,
            detail: detail.into(),
        }
    }
}

/// Per-symbol memory carried between ticks of one position's lifetime.
///
/// The advisor reference fields (`last_advisor_*`, `last_funding_sign`) move
/// only when an advisory completes; the cooldown map moves whenever a trigger
/// fires. Reset wholesale when a position closes and reopens.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerState {
    /// Milliseconds since epoch of the last completed advisory; 0 = never.
    pub last_advisor_check_ms: i64,
    pub last_advisor_pnl_pct: f64,
    pub last_advisor_mark_price: f64,
    /// Sign of the funding rate at the last completed advisory: -1, 0, +1.
    pub last_funding_sign: i8,
    /// Trigger -> timestamp (ms) of that trigger's most recent firing.
    pub cooldowns: HashMap<Trigger, i64>,
}

/// Closed set of actions the advisor may propose. Anything outside this sum
/// is a parse error, not an order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum AdvisorAction {
    Hold,
    TightenStop { new_stop_price: f64 },
    AdjustTakeProfit { new_tp_price: f64 },
    PartialClose { fraction_of_position: f64 },
    Close,
}

impl AdvisorAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::TightenStop { .. } => "tighten_stop",
            Self::AdjustTakeProfit { .. } => "adjust_take_profit",
            Self::PartialClose { .. } => "partial_close",
            Self::Close => "close",
        }
    }
}

/// A parsed advisor reply: the proposed action plus its stated rationale.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdvisorDecision {
    #[serde(flatten)]
    pub action: AdvisorAction,
    pub reason: String,
}

/// Terminal status of one advisory or circuit-breaker pass.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Action validated and dispatched (or `hold`).
    Ok,
    /// LLM or order-gateway failure; nothing (more) was dispatched.
    Failed,
    /// The proposed action violated the safety envelope.
    Rejected,
    /// The advisor budget was exhausted; no LLM call was made.
    Skipped,
    /// Informational record with no decision (e.g. position closed).
    Info,
}

/// Record family written to the journal.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    PositionHeartbeat,
    CircuitBreaker,
}

/// Append-only journal artifact for one heartbeat decision.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub symbol: Symbol,
    /// Tick timestamp (ms since epoch) this record describes.
    pub timestamp: i64,
    pub recorded_at: DateTime<Utc>,
    pub triggers: Vec<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<AdvisorDecision>,
    pub outcome: Outcome,
    /// Reject reason, error text, or breaker detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TickSummary>,
}

impl DecisionRecord {
    /// Idempotence key: at most one journal entry per symbol per tick.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("heartbeat:{}:{}", self.symbol, self.timestamp)
    }
}

/// Sign helper with the conventions the trigger evaluator expects: exact
/// zero and non-finite values both map to 0.
#[must_use]
pub fn funding_sign(rate: f64) -> i8 {
    if !rate.is_finite() || rate == 0.0 {
        0
    } else if rate > 0.0 {
        1
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> DecisionRecord {
        DecisionRecord {
            id: Uuid::new_v4(),
            kind: RecordKind::PositionHeartbeat,
            symbol: "ETH".into(),
            timestamp: 1_700_000_000_000,
            recorded_at: Utc::now(),
            triggers: vec![Trigger::PnlShift, Trigger::TimeCeiling],
            decision: Some(AdvisorDecision {
                action: AdvisorAction::TightenStop {
                    new_stop_price: 2080.0,
                },
                reason: "lock in gains".into(),
            }),
            outcome: Outcome::Ok,
            detail: None,
            snapshot: None,
        }
    }

    #[test]
    fn decision_record_round_trips_through_json() {
        let record = sample_record();
        let line = serde_json::to_string(&record).unwrap();
        let back: DecisionRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn fingerprint_is_symbol_and_tick_scoped() {
        let record = sample_record();
        assert_eq!(record.fingerprint(), "heartbeat:ETH:1700000000000");
    }

    #[test]
    fn trigger_names_are_snake_case_wire_values() {
        for trigger in Trigger::ALL {
            let json = serde_json::to_string(&trigger).unwrap();
            assert_eq!(json, format!("\"{}\"", trigger.name()));
        }
    }

    #[test]
    fn funding_sign_conventions() {
        assert_eq!(funding_sign(0.0002), 1);
        assert_eq!(funding_sign(-0.0003), -1);
        assert_eq!(funding_sign(0.0), 0);
        assert_eq!(funding_sign(f64::NAN), 0);
        assert_eq!(funding_sign(f64::INFINITY), 0);
    }

    #[test]
    fn hold_action_serializes_without_params() {
        let decision = AdvisorDecision {
            action: AdvisorAction::Hold,
            reason: "nothing to do".into(),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "hold");
        assert_eq!(json["reason"], "nothing to do");
    }
}
