//! Pure significance filter: decides which triggers fire on a tick.
//!
//! No I/O and no clock access; the caller supplies `now_ms` (the tick
//! timestamp) and receives the fired triggers plus the successor state.
//! Replaying the same inputs yields the same outputs.

use vigil_core::{funding_sign, FiredTrigger, PositionTick, RollingBuffer, Trigger, TriggerState};

use crate::settings::TriggerSettings;

/// Lifecycle hints the watcher passes alongside the tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickFlags {
    pub position_opened: bool,
    pub position_closed: bool,
}

/// Result of evaluating one tick.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub fired: Vec<FiredTrigger>,
    pub next_state: TriggerState,
}

/// Evaluate the full trigger catalog against one tick.
///
/// Cooldown discipline: a trigger is eligible iff `now_ms` minus its last
/// firing is at least its resolved cooldown, and its cooldown stamp moves
/// exactly when it fires. The advisor reference fields are untouched here;
/// [`commit_advisor_state`] moves them when an advisory completes.
#[must_use]
pub fn evaluate(
    now_ms: i64,
    tick: &PositionTick,
    buffer: &RollingBuffer,
    state: &TriggerState,
    settings: &TriggerSettings,
    flags: TickFlags,
) -> Evaluation {
    let mut next_state = state.clone();
    let mut fired = Vec::new();

    let mut fire = |next_state: &mut TriggerState, trigger: Trigger, detail: String| {
        let cooldown_ms = settings.cooldown(trigger).as_millis() as i64;
        let eligible = match next_state.cooldowns.get(&trigger) {
            Some(last) => now_ms.saturating_sub(*last) >= cooldown_ms,
            None => true,
        };
        if eligible {
            next_state.cooldowns.insert(trigger, now_ms);
            fired.push(FiredTrigger::new(trigger, detail));
        }
    };

    if flags.position_opened {
        fire(
            &mut next_state,
            Trigger::PositionOpened,
            format!("{} {} position observed", tick.symbol, tick.side),
        );
    }
    if flags.position_closed {
        fire(
            &mut next_state,
            Trigger::PositionClosed,
            format!("{} position no longer open", tick.symbol),
        );
    }

    if tick.stop_loss_price.is_none() {
        fire(
            &mut next_state,
            Trigger::StopMissing,
            "no stop-loss order is resting".to_string(),
        );
    }

    if tick.pnl_pct_of_equity.is_finite() {
        let shift = (tick.pnl_pct_of_equity - state.last_advisor_pnl_pct).abs();
        if shift >= settings.pnl_shift_pct {
            fire(
                &mut next_state,
                Trigger::PnlShift,
                format!(
                    "pnl {:.2}% of equity vs {:.2}% at last review (threshold {:.2}%)",
                    tick.pnl_pct_of_equity, state.last_advisor_pnl_pct, settings.pnl_shift_pct
                ),
            );
        }
    }

    if let Some(stop) = tick.stop_loss_price {
        if let Some(dist) = price_distance_pct(tick.mark_price, stop) {
            if dist <= settings.approaching_stop_pct {
                fire(
                    &mut next_state,
                    Trigger::ApproachingStop,
                    format!("mark {:.2} is {dist:.2}% from stop {stop:.2}", tick.mark_price),
                );
            }
        }
    }

    if let Some(tp) = tick.take_profit_price {
        if let Some(dist) = price_distance_pct(tick.mark_price, tp) {
            if dist <= settings.approaching_tp_pct {
                fire(
                    &mut next_state,
                    Trigger::ApproachingTp,
                    format!(
                        "mark {:.2} is {dist:.2}% from take-profit {tp:.2}",
                        tick.mark_price
                    ),
                );
            }
        }
    }

    if tick.dist_to_liquidation_pct.is_finite()
        && tick.dist_to_liquidation_pct <= settings.liquidation_proximity_pct
    {
        fire(
            &mut next_state,
            Trigger::LiquidationProximity,
            format!(
                "{:.2}% from liquidation price {:.2}",
                tick.dist_to_liquidation_pct, tick.liquidation_price
            ),
        );
    }

    let current_sign = funding_sign(tick.funding_rate);
    if current_sign != 0 && state.last_funding_sign != 0 && current_sign != state.last_funding_sign
    {
        fire(
            &mut next_state,
            Trigger::FundingFlip,
            format!(
                "funding flipped from {} to {} ({:+.5})",
                sign_label(state.last_funding_sign),
                sign_label(current_sign),
                tick.funding_rate
            ),
        );
    }

    if tick.funding_rate.is_finite() && tick.funding_rate.abs() >= settings.funding_spike {
        fire(
            &mut next_state,
            Trigger::FundingSpike,
            format!(
                "funding rate {:+.5} beyond {:.5}",
                tick.funding_rate, settings.funding_spike
            ),
        );
    }

    // The buffer already contains the current tick, so the reference sits
    // `volatility_window` polls back and the trigger needs window + 1 ticks.
    if buffer.len() > settings.volatility_window {
        if let Some(base) = buffer.at_from_end(settings.volatility_window) {
            if let Some(change) = price_change_pct(base.mark_price, tick.mark_price) {
                if change.abs() >= settings.volatility_spike_pct {
                    fire(
                        &mut next_state,
                        Trigger::VolatilitySpike,
                        format!(
                            "mark moved {change:+.2}% over the last {} ticks",
                            settings.volatility_window
                        ),
                    );
                }
            }
        }
    }

    let ceiling_ms = settings.time_ceiling.as_millis() as i64;
    if state.last_advisor_check_ms == 0
        || now_ms.saturating_sub(state.last_advisor_check_ms) >= ceiling_ms
    {
        let detail = if state.last_advisor_check_ms == 0 {
            "position has never been reviewed".to_string()
        } else {
            format!(
                "{:.1} minutes since last review",
                now_ms.saturating_sub(state.last_advisor_check_ms) as f64 / 60_000.0
            )
        };
        fire(&mut next_state, Trigger::TimeCeiling, detail);
    }

    Evaluation { fired, next_state }
}

/// Move the advisor reference fields after an advisory completes (with any
/// outcome except a budget skip).
pub fn commit_advisor_state(state: &mut TriggerState, tick: &PositionTick) {
    state.last_advisor_check_ms = tick.timestamp;
    state.last_advisor_pnl_pct = tick.pnl_pct_of_equity;
    state.last_advisor_mark_price = tick.mark_price;
    state.last_funding_sign = funding_sign(tick.funding_rate);
}

/// `|mark - level| / |mark| * 100`, `None` on non-finite or zero mark.
fn price_distance_pct(mark: f64, level: f64) -> Option<f64> {
    if !mark.is_finite() || !level.is_finite() || mark == 0.0 {
        return None;
    }
    Some((mark - level).abs() / mark.abs() * 100.0)
}

/// Signed percent change from `base` to `current`.
fn price_change_pct(base: f64, current: f64) -> Option<f64> {
    if !base.is_finite() || !current.is_finite() || base == 0.0 {
        return None;
    }
    Some((current - base) / base * 100.0)
}

fn sign_label(sign: i8) -> &'static str {
    match sign {
        1 => "positive",
        -1 => "negative",
        _ => "flat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::PositionSide;

    const MINUTE_MS: i64 = 60_000;

    fn tick(timestamp: i64, mark: f64) -> PositionTick {
        PositionTick {
            timestamp,
            symbol: "ETH".into(),
            side: PositionSide::Long,
            size: 5.0,
            entry_price: 2080.0,
            mark_price: mark,
            unrealized_pnl: (mark - 2080.0) * 5.0,
            pnl_pct_of_equity: (mark - 2080.0) * 5.0 / 10_000.0 * 100.0,
            account_equity: 10_000.0,
            margin_used: 1_000.0,
            liquidation_price: 1_800.0,
            dist_to_liquidation_pct: (mark - 1_800.0).abs() / mark * 100.0,
            funding_rate: 0.00005,
            stop_loss_price: Some(2050.0),
            take_profit_price: Some(2140.0),
            stop_loss_order_id: Some("sl-1".into()),
            take_profit_order_id: Some("tp-1".into()),
        }
    }

    fn reviewed_state(at_ms: i64, tick: &PositionTick) -> TriggerState {
        let mut state = TriggerState::default();
        let mut tick = tick.clone();
        tick.timestamp = at_ms;
        commit_advisor_state(&mut state, &tick);
        state
    }

    fn fired_names(eval: &Evaluation) -> Vec<Trigger> {
        eval.fired.iter().map(|f| f.trigger).collect()
    }

    fn buffer_with(ticks: &[PositionTick]) -> RollingBuffer {
        let mut buffer = RollingBuffer::new(60);
        for t in ticks {
            buffer.push(t.clone());
        }
        buffer
    }

    #[test]
    fn quiet_position_fires_only_time_ceiling_at_the_fifteen_minute_mark() {
        // Sixty 30-second ticks with mark drifting inside [2078, 2085],
        // starting from a just-reviewed state.
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let mut state = reviewed_state(t0, &tick(t0, 2080.0));
        let mut buffer = RollingBuffer::new(60);
        let mut ceiling_ticks = Vec::new();

        for i in 1..=60 {
            let now = t0 + i * 30_000;
            let mark = 2078.0 + ((i * 7) % 8) as f64; // wanders within [2078, 2085]
            let t = tick(now, mark);
            buffer.push(t.clone());
            let eval = evaluate(now, &t, &buffer, &state, &settings, TickFlags::default());
            for f in &eval.fired {
                assert_eq!(
                    f.trigger,
                    Trigger::TimeCeiling,
                    "unexpected trigger {} on tick {i}",
                    f.trigger
                );
                ceiling_ticks.push(i);
            }
            state = eval.next_state;
            if !eval.fired.is_empty() {
                // One advisor pass completes and re-baselines the clock.
                commit_advisor_state(&mut state, &t);
            }
        }
        assert_eq!(ceiling_ticks, vec![30, 60]);
    }

    #[test]
    fn pnl_shift_compares_against_last_advised_value() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let baseline = tick(t0, 2080.0); // pnl 0% at review time
        let state = reviewed_state(t0, &baseline);

        // +1.4% of equity: below the 1.5 threshold, must not fire.
        let near = tick(t0 + 12 * 30_000, 2108.0);
        let buffer = buffer_with(&[near.clone()]);
        let eval = evaluate(
            near.timestamp,
            &near,
            &buffer,
            &state,
            &settings,
            TickFlags::default(),
        );
        assert!(!fired_names(&eval).contains(&Trigger::PnlShift));

        // +1.5% exactly: fires.
        let at = tick(t0 + 15 * 30_000, 2110.0);
        let buffer = buffer_with(&[at.clone()]);
        let eval = evaluate(
            at.timestamp,
            &at,
            &buffer,
            &state,
            &settings,
            TickFlags::default(),
        );
        assert!(fired_names(&eval).contains(&Trigger::PnlShift));
    }

    #[test]
    fn adverse_spike_fires_volatility_and_approaching_stop() {
        // Short BTC into a rally: entry 70000, stop 71500, five ticks
        // [69800, 70000, 70200, 70500, 70900] with window 4 and 1.5%.
        let mut settings = TriggerSettings::default();
        settings.volatility_window = 4;
        settings.volatility_spike_pct = 1.5;

        let t0 = 1_700_000_000_000;
        let marks = [69_800.0, 70_000.0, 70_200.0, 70_500.0, 70_900.0];
        let mut buffer = RollingBuffer::new(60);
        let mut last = None;
        for (i, mark) in marks.iter().enumerate() {
            let mut t = tick(t0 + i as i64 * 45_000, *mark);
            t.symbol = "BTC".into();
            t.side = PositionSide::Short;
            t.entry_price = 70_000.0;
            t.stop_loss_price = Some(71_500.0);
            t.take_profit_price = None;
            t.liquidation_price = 80_000.0;
            t.dist_to_liquidation_pct = (t.mark_price - 80_000.0).abs() / t.mark_price * 100.0;
            buffer.push(t.clone());
            last = Some(t);
        }
        let last = last.unwrap();
        let state = reviewed_state(t0, &last);
        let eval = evaluate(
            last.timestamp,
            &last,
            &buffer,
            &state,
            &settings,
            TickFlags::default(),
        );
        let names = fired_names(&eval);
        // 69800 -> 70900 is +1.576% over the 4-tick window.
        assert!(names.contains(&Trigger::VolatilitySpike));
        // 70900 is 0.85% below the 71500 stop.
        assert!(names.contains(&Trigger::ApproachingStop));
    }

    #[test]
    fn funding_flip_and_spike_fire_together() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let mut first = tick(t0, 2080.0);
        first.funding_rate = 0.0002;
        let state = reviewed_state(t0, &first);
        assert_eq!(state.last_funding_sign, 1);

        let mut second = tick(t0 + 30_000, 2080.0);
        second.funding_rate = -0.0003;
        let buffer = buffer_with(&[first, second.clone()]);
        let eval = evaluate(
            second.timestamp,
            &second,
            &buffer,
            &state,
            &settings,
            TickFlags::default(),
        );
        let names = fired_names(&eval);
        assert!(names.contains(&Trigger::FundingFlip));
        assert!(names.contains(&Trigger::FundingSpike));
    }

    #[test]
    fn cooldowns_gate_repeat_firings() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let mut t = tick(t0, 2080.0);
        t.stop_loss_price = None;
        t.stop_loss_order_id = None;
        let state = reviewed_state(t0, &t);
        let buffer = buffer_with(&[t.clone()]);

        let eval = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        assert!(fired_names(&eval).contains(&Trigger::StopMissing));
        let after_first = eval.next_state;

        // 30 seconds later: still missing, but inside the 60 s cooldown.
        let mut again = t.clone();
        again.timestamp = t0 + 30_000;
        let eval = evaluate(
            again.timestamp,
            &again,
            &buffer,
            &after_first,
            &settings,
            TickFlags::default(),
        );
        assert!(!fired_names(&eval).contains(&Trigger::StopMissing));

        // At the cooldown boundary it may fire again.
        let mut later = t.clone();
        later.timestamp = t0 + 60_000;
        let eval = evaluate(
            later.timestamp,
            &later,
            &buffer,
            &after_first,
            &settings,
            TickFlags::default(),
        );
        assert!(fired_names(&eval).contains(&Trigger::StopMissing));
    }

    #[test]
    fn cooldown_stamps_move_only_for_fired_triggers() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let t = tick(t0, 2080.0);
        let state = reviewed_state(t0 - 10 * MINUTE_MS, &t);
        let buffer = buffer_with(&[t.clone()]);
        let eval = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        assert!(eval.fired.is_empty());
        assert_eq!(eval.next_state.cooldowns, state.cooldowns);
    }

    #[test]
    fn evaluation_is_pure() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let t = tick(t0, 2110.0);
        let state = reviewed_state(t0 - 20 * MINUTE_MS, &t);
        let buffer = buffer_with(&[t.clone()]);
        let first = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        let second = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        assert_eq!(first.fired, second.fired);
        assert_eq!(first.next_state, second.next_state);
    }

    #[test]
    fn non_finite_inputs_never_fire() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let mut t = tick(t0, 2080.0);
        t.pnl_pct_of_equity = f64::NAN;
        t.funding_rate = f64::INFINITY;
        t.dist_to_liquidation_pct = f64::INFINITY;
        let state = reviewed_state(t0, &t);
        let buffer = buffer_with(&[t.clone()]);
        let eval = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        let names = fired_names(&eval);
        assert!(!names.contains(&Trigger::PnlShift));
        assert!(!names.contains(&Trigger::FundingSpike));
        assert!(!names.contains(&Trigger::LiquidationProximity));
    }

    #[test]
    fn short_volatility_history_is_silently_skipped() {
        let mut settings = TriggerSettings::default();
        settings.volatility_window = 10;
        settings.volatility_spike_pct = 0.01; // would fire on any move
        let t0 = 1_700_000_000_000;
        let t = tick(t0, 2300.0);
        let state = reviewed_state(t0, &t);
        let buffer = buffer_with(&[tick(t0 - 30_000, 2080.0), t.clone()]);
        let eval = evaluate(t0, &t, &buffer, &state, &settings, TickFlags::default());
        assert!(!fired_names(&eval).contains(&Trigger::VolatilitySpike));
    }

    #[test]
    fn fresh_state_fires_time_ceiling_immediately() {
        let settings = TriggerSettings::default();
        let t0 = 1_700_000_000_000;
        let t = tick(t0, 2080.0);
        let state = TriggerState::default();
        let buffer = buffer_with(&[t.clone()]);
        let eval = evaluate(
            t0,
            &t,
            &buffer,
            &state,
            &settings,
            TickFlags {
                position_opened: true,
                position_closed: false,
            },
        );
        let names = fired_names(&eval);
        assert!(names.contains(&Trigger::PositionOpened));
        assert!(names.contains(&Trigger::TimeCeiling));
    }

    #[test]
    fn commit_moves_reference_fields_to_the_tick() {
        let mut state = TriggerState::default();
        let mut t = tick(1_700_000_123_000, 2110.0);
        t.funding_rate = -0.0004;
        commit_advisor_state(&mut state, &t);
        assert_eq!(state.last_advisor_check_ms, 1_700_000_123_000);
        assert_eq!(state.last_advisor_mark_price, 2110.0);
        assert_eq!(state.last_funding_sign, -1);
        assert!((state.last_advisor_pnl_pct - t.pnl_pct_of_equity).abs() < 1e-12);
    }
}
