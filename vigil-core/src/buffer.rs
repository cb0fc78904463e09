//! Bounded per-symbol history of position ticks.

use std::collections::VecDeque;

use crate::PositionTick;

/// Fixed-capacity FIFO of [`PositionTick`]s for one symbol.
///
/// Created when a position is first observed, dropped when it closes. The
/// newest tick is at the back; eviction removes the oldest on overflow.
#[derive(Clone, Debug)]
pub struct RollingBuffer {
    ticks: VecDeque<PositionTick>,
    capacity: usize,
}

impl RollingBuffer {
    /// Creates a buffer holding at most `capacity` ticks.
    ///
    /// # Panics
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "buffer capacity must be positive");
        Self {
            ticks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, tick: PositionTick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tick at `offset` polls before the newest one (`0` = newest).
    #[must_use]
    pub fn at_from_end(&self, offset: usize) -> Option<&PositionTick> {
        let len = self.ticks.len();
        if offset >= len {
            return None;
        }
        self.ticks.get(len - 1 - offset)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&PositionTick> {
        self.ticks.back()
    }

    /// The last `n` ticks in chronological order (fewer when the buffer is
    /// still filling).
    #[must_use]
    pub fn window(&self, n: usize) -> Vec<&PositionTick> {
        let skip = self.ticks.len().saturating_sub(n);
        self.ticks.iter().skip(skip).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PositionTick> {
        self.ticks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PositionSide, PositionTick};

    fn tick(timestamp: i64, mark: f64) -> PositionTick {
        PositionTick {
            timestamp,
            symbol: "ETH".into(),
            side: PositionSide::Long,
            size: 1.0,
            entry_price: 2080.0,
            mark_price: mark,
            unrealized_pnl: mark - 2080.0,
            pnl_pct_of_equity: 0.0,
            account_equity: 10_000.0,
            margin_used: 500.0,
            liquidation_price: 1900.0,
            dist_to_liquidation_pct: 8.0,
            funding_rate: 0.0001,
            stop_loss_price: Some(2050.0),
            take_profit_price: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut buffer = RollingBuffer::new(3);
        for i in 0..5 {
            buffer.push(tick(i, 2080.0 + i as f64));
        }
        assert_eq!(buffer.len(), 3);
        let timestamps: Vec<i64> = buffer.iter().map(|t| t.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
    }

    #[test]
    fn at_from_end_counts_back_from_newest() {
        let mut buffer = RollingBuffer::new(10);
        for i in 0..4 {
            buffer.push(tick(i, 2080.0));
        }
        assert_eq!(buffer.at_from_end(0).unwrap().timestamp, 3);
        assert_eq!(buffer.at_from_end(3).unwrap().timestamp, 0);
        assert!(buffer.at_from_end(4).is_none());
    }

    #[test]
    fn window_returns_chronological_tail() {
        let mut buffer = RollingBuffer::new(10);
        for i in 0..6 {
            buffer.push(tick(i, 2080.0));
        }
        let window: Vec<i64> = buffer.window(3).iter().map(|t| t.timestamp).collect();
        assert_eq!(window, vec![3, 4, 5]);
        assert_eq!(buffer.window(100).len(), 6);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_is_rejected() {
        let _ = RollingBuffer::new(0);
    }
}
