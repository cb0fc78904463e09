//! Builds one [`PositionTick`] per poll from the market-data collaborator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use vigil_broker::{BrokerError, BrokerResult, MarketData, TriggerOrder, TriggerOrderKind};
use vigil_core::{PositionSide, PositionTick, EQUITY_EPSILON};

use crate::now_ms;

/// Aggregates the four provider calls into a derived snapshot.
pub struct Snapshotter {
    market: Arc<dyn MarketData>,
    timeout: Duration,
}

impl Snapshotter {
    pub fn new(market: Arc<dyn MarketData>, timeout: Duration) -> Self {
        Self { market, timeout }
    }

    /// Snapshot `symbol`, returning `Ok(None)` when no position is open.
    ///
    /// Any upstream failure (including malformed numbers) surfaces as an
    /// error; the caller skips the tick and leaves buffer and state alone.
    pub async fn snapshot(&self, symbol: &str) -> BrokerResult<Option<PositionTick>> {
        let positions = self
            .bounded(self.market.list_open_positions())
            .await?;
        let Some(position) = positions.into_iter().find(|p| p.symbol == symbol) else {
            return Ok(None);
        };

        let mark = self.bounded(self.market.mark(symbol)).await?;
        let equity = self.bounded(self.market.equity()).await?;
        let orders = self
            .bounded(self.market.list_open_trigger_orders(symbol))
            .await?;

        if !mark.mark_price.is_finite() || mark.mark_price <= 0.0 {
            return Err(BrokerError::Serialization(format!(
                "non-positive mark price {} for {symbol}",
                mark.mark_price
            )));
        }
        if !position.size.is_finite() || position.size <= 0.0 {
            return Err(BrokerError::Serialization(format!(
                "non-positive position size {} for {symbol}",
                position.size
            )));
        }

        let unrealized_pnl =
            (mark.mark_price - position.entry_price) * position.size * position.side.sign();
        let pnl_pct_of_equity = unrealized_pnl / equity.max(EQUITY_EPSILON) * 100.0;
        let dist_to_liquidation_pct =
            liquidation_distance_pct(mark.mark_price, position.liquidation_price);

        let stop = select_protective(&orders, TriggerOrderKind::Sl, position.side, mark.mark_price);
        let tp = select_protective(&orders, TriggerOrderKind::Tp, position.side, mark.mark_price);

        let tick = PositionTick {
            timestamp: now_ms(),
            symbol: symbol.to_string(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            mark_price: mark.mark_price,
            unrealized_pnl,
            pnl_pct_of_equity,
            account_equity: equity,
            margin_used: position.margin_used,
            liquidation_price: position.liquidation_price,
            dist_to_liquidation_pct,
            funding_rate: mark.funding_rate,
            stop_loss_price: stop.as_ref().map(|o| o.trigger_price),
            take_profit_price: tp.as_ref().map(|o| o.trigger_price),
            stop_loss_order_id: stop.map(|o| o.order_id),
            take_profit_order_id: tp.map(|o| o.order_id),
        };
        debug!(
            symbol,
            mark = tick.mark_price,
            pnl_pct = tick.pnl_pct_of_equity,
            "snapshot taken"
        );
        Ok(Some(tick))
    }

    async fn bounded<T>(&self, fut: impl Future<Output = BrokerResult<T>>) -> BrokerResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.timeout)),
        }
    }
}

/// Percent distance from mark to liquidation; `+inf` when inputs are unusable.
#[must_use]
pub fn liquidation_distance_pct(mark: f64, liquidation: f64) -> f64 {
    if !mark.is_finite() || !liquidation.is_finite() || mark == 0.0 {
        return f64::INFINITY;
    }
    (mark - liquidation).abs() / mark.abs() * 100.0
}

/// Among trigger orders of `kind`, pick the one closest to mark on the
/// protective side; falls back to the closest overall when none sits there.
fn select_protective(
    orders: &[TriggerOrder],
    kind: TriggerOrderKind,
    side: PositionSide,
    mark: f64,
) -> Option<TriggerOrder> {
    let candidates: Vec<&TriggerOrder> = orders
        .iter()
        .filter(|o| o.kind == kind && o.trigger_price.is_finite())
        .collect();
    if candidates.len() <= 1 {
        return candidates.into_iter().next().cloned();
    }

    let protective = |price: f64| match (kind, side) {
        (TriggerOrderKind::Sl, PositionSide::Long) | (TriggerOrderKind::Tp, PositionSide::Short) => {
            price < mark
        }
        (TriggerOrderKind::Sl, PositionSide::Short) | (TriggerOrderKind::Tp, PositionSide::Long) => {
            price > mark
        }
    };

    let by_distance = |a: &&TriggerOrder, b: &&TriggerOrder| {
        let da = (a.trigger_price - mark).abs();
        let db = (b.trigger_price - mark).abs();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    };

    candidates
        .iter()
        .copied()
        .filter(|o| protective(o.trigger_price))
        .min_by(by_distance)
        .or_else(|| candidates.iter().copied().min_by(by_distance))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, kind: TriggerOrderKind, price: f64) -> TriggerOrder {
        TriggerOrder {
            order_id: id.into(),
            kind,
            trigger_price: price,
        }
    }

    #[test]
    fn liquidation_distance_handles_bad_inputs() {
        assert_eq!(liquidation_distance_pct(0.0, 100.0), f64::INFINITY);
        assert_eq!(liquidation_distance_pct(100.0, f64::NAN), f64::INFINITY);
        let dist = liquidation_distance_pct(2000.0, 1900.0);
        assert!((dist - 5.0).abs() < 1e-9);
    }

    #[test]
    fn single_stop_is_used_regardless_of_side() {
        let orders = vec![order("a", TriggerOrderKind::Sl, 2100.0)];
        let selected =
            select_protective(&orders, TriggerOrderKind::Sl, PositionSide::Long, 2000.0).unwrap();
        assert_eq!(selected.order_id, "a");
    }

    #[test]
    fn closest_protective_stop_wins_for_long() {
        let orders = vec![
            order("far", TriggerOrderKind::Sl, 1800.0),
            order("near", TriggerOrderKind::Sl, 1950.0),
            order("wrong-side", TriggerOrderKind::Sl, 2050.0),
        ];
        let selected =
            select_protective(&orders, TriggerOrderKind::Sl, PositionSide::Long, 2000.0).unwrap();
        assert_eq!(selected.order_id, "near");
    }

    #[test]
    fn short_take_profit_sits_below_mark() {
        let orders = vec![
            order("below", TriggerOrderKind::Tp, 68_000.0),
            order("above", TriggerOrderKind::Tp, 72_000.0),
        ];
        let selected =
            select_protective(&orders, TriggerOrderKind::Tp, PositionSide::Short, 70_000.0)
                .unwrap();
        assert_eq!(selected.order_id, "below");
    }
}
