//! Hard, LLM-free safety rails evaluated before the advisor path.

use vigil_core::PositionTick;

use crate::settings::BreakerSettings;

/// A tripped circuit breaker. Forces an immediate full close; the advisor is
/// never consulted on the same tick.
#[derive(Clone, Debug, PartialEq)]
pub enum BreakerTrip {
    LiquidationProximity { dist_pct: f64, limit: f64 },
    LossLimit { pnl_pct: f64, limit: f64 },
}

impl BreakerTrip {
    /// Close reason passed to the order gateway and the journal.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::LiquidationProximity { limit, .. } => {
                format!("liquidation_proximity<{limit}%")
            }
            Self::LossLimit { limit, .. } => format!("loss_limit<{limit}%"),
        }
    }

    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::LiquidationProximity { dist_pct, limit } => format!(
                "distance to liquidation {dist_pct:.2}% below the {limit}% breaker"
            ),
            Self::LossLimit { pnl_pct, limit } => {
                format!("pnl {pnl_pct:.2}% of equity below the {limit}% breaker")
            }
        }
    }
}

/// Check both breakers against one tick. Liquidation proximity wins when
/// both would trip.
#[must_use]
pub fn check(tick: &PositionTick, settings: &BreakerSettings) -> Option<BreakerTrip> {
    if tick.dist_to_liquidation_pct.is_finite()
        && tick.dist_to_liquidation_pct < settings.liq_pct
    {
        return Some(BreakerTrip::LiquidationProximity {
            dist_pct: tick.dist_to_liquidation_pct,
            limit: settings.liq_pct,
        });
    }
    if tick.pnl_pct_of_equity.is_finite() && tick.pnl_pct_of_equity < settings.loss_pct {
        return Some(BreakerTrip::LossLimit {
            pnl_pct: tick.pnl_pct_of_equity,
            limit: settings.loss_pct,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::PositionSide;

    fn tick(dist_to_liq: f64, pnl_pct: f64) -> PositionTick {
        PositionTick {
            timestamp: 1_700_000_000_000,
            symbol: "BTC".into(),
            side: PositionSide::Long,
            size: 0.5,
            entry_price: 70_000.0,
            mark_price: 68_000.0,
            unrealized_pnl: -1_000.0,
            pnl_pct_of_equity: pnl_pct,
            account_equity: 1_000.0,
            margin_used: 500.0,
            liquidation_price: 67_000.0,
            dist_to_liquidation_pct: dist_to_liq,
            funding_rate: 0.0,
            stop_loss_price: None,
            take_profit_price: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn liquidation_breaker_trips_below_two_percent() {
        let settings = BreakerSettings::default();
        let trip = check(&tick(1.5, -1.0), &settings).unwrap();
        assert_eq!(trip.reason(), "liquidation_proximity<2%");
        assert!(check(&tick(2.0, -1.0), &settings).is_none());
    }

    #[test]
    fn loss_breaker_trips_below_minus_five_percent() {
        let settings = BreakerSettings::default();
        let trip = check(&tick(10.0, -5.1), &settings).unwrap();
        assert_eq!(trip.reason(), "loss_limit<-5%");
        assert!(check(&tick(10.0, -5.0), &settings).is_none());
    }

    #[test]
    fn liquidation_breaker_takes_precedence() {
        let settings = BreakerSettings::default();
        let trip = check(&tick(1.0, -9.0), &settings).unwrap();
        assert!(matches!(trip, BreakerTrip::LiquidationProximity { .. }));
    }

    #[test]
    fn non_finite_inputs_do_not_trip() {
        let settings = BreakerSettings::default();
        assert!(check(&tick(f64::INFINITY, f64::NAN), &settings).is_none());
    }
}
