//! Process-wide advisor call budget over a sliding window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Sliding-window rate limit shared by every watcher. The only cross-symbol
/// state in the engine; guarded by a single mutex.
pub struct AdvisorBudget {
    max_calls: u32,
    window_ms: i64,
    calls: Mutex<VecDeque<i64>>,
}

impl AdvisorBudget {
    /// Budget of `max_calls` per sliding hour.
    #[must_use]
    pub fn hourly(max_calls: u32) -> Self {
        Self::with_window(max_calls, Duration::from_secs(3600))
    }

    #[must_use]
    pub fn with_window(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window_ms: window.as_millis() as i64,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    /// Claim one advisory slot at `now_ms`. Returns `false` when the window
    /// is full; the caller then skips the LLM entirely.
    pub fn try_acquire(&self, now_ms: i64) -> bool {
        let mut calls = self.calls.lock().expect("budget mutex poisoned");
        Self::expire(&mut calls, now_ms, self.window_ms);
        if calls.len() as u32 >= self.max_calls {
            return false;
        }
        calls.push_back(now_ms);
        true
    }

    /// Slots still available at `now_ms`; surfaced to the advisor prompt.
    pub fn remaining(&self, now_ms: i64) -> u32 {
        let mut calls = self.calls.lock().expect("budget mutex poisoned");
        Self::expire(&mut calls, now_ms, self.window_ms);
        self.max_calls.saturating_sub(calls.len() as u32)
    }

    fn expire(calls: &mut VecDeque<i64>, now_ms: i64, window_ms: i64) {
        while let Some(oldest) = calls.front() {
            if now_ms.saturating_sub(*oldest) >= window_ms {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn enforces_the_window_maximum() {
        let budget = AdvisorBudget::hourly(3);
        let t0 = 1_700_000_000_000;
        assert!(budget.try_acquire(t0));
        assert!(budget.try_acquire(t0 + 1));
        assert!(budget.try_acquire(t0 + 2));
        assert!(!budget.try_acquire(t0 + 3));
        assert_eq!(budget.remaining(t0 + 3), 0);
    }

    #[test]
    fn capacity_returns_as_calls_age_out() {
        let budget = AdvisorBudget::hourly(2);
        let t0 = 1_700_000_000_000;
        assert!(budget.try_acquire(t0));
        assert!(budget.try_acquire(t0 + 1_000));
        assert!(!budget.try_acquire(t0 + 2_000));
        // The first call leaves the window; one slot frees up.
        assert!(budget.try_acquire(t0 + HOUR_MS));
        assert!(!budget.try_acquire(t0 + HOUR_MS + 1));
    }

    #[test]
    fn no_sliding_hour_ever_exceeds_the_maximum() {
        let budget = AdvisorBudget::hourly(5);
        let t0 = 1_700_000_000_000;
        let mut granted = Vec::new();
        // One attempt every 5 minutes for 3 hours.
        for i in 0..36 {
            let now = t0 + i * 5 * 60_000;
            if budget.try_acquire(now) {
                granted.push(now);
            }
        }
        for &start in &granted {
            let in_window = granted
                .iter()
                .filter(|&&t| t >= start && t < start + HOUR_MS)
                .count();
            assert!(in_window <= 5, "window starting at {start} holds {in_window}");
        }
    }

    #[test]
    fn remaining_reports_free_slots() {
        let budget = AdvisorBudget::hourly(4);
        let t0 = 1_700_000_000_000;
        assert_eq!(budget.remaining(t0), 4);
        budget.try_acquire(t0);
        assert_eq!(budget.remaining(t0), 3);
    }
}
