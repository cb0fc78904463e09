//! Builds the advisory prompt from structured tick context.

use std::fmt::Write;

use chrono::{TimeZone, Utc};
use vigil_broker::AccountContext;
use vigil_core::{FiredTrigger, PositionTick, RollingBuffer};

use crate::settings::BreakerSettings;

/// Everything the user message embeds.
pub struct PromptInputs<'a> {
    pub tick: &'a PositionTick,
    pub buffer: &'a RollingBuffer,
    pub fired: &'a [FiredTrigger],
    pub thesis: Option<String>,
    pub account: AccountContext,
    pub open_positions: usize,
    pub breakers: BreakerSettings,
    pub budget_remaining: u32,
}

/// Fixed system preamble: role, output contract, risk-only mandate.
#[must_use]
pub fn system_prompt() -> &'static str {
    "You are a position risk manager for a perpetual-futures account. You may \
     only reduce risk: tighten stops toward the mark price, move take-profit \
     levels, take partial profit, or close the position. You may never widen \
     a stop, open a position, or increase size. Respond with a single JSON \
     object and nothing else."
}

/// Assemble the structured user message.
#[must_use]
pub fn user_prompt(inputs: &PromptInputs<'_>) -> String {
    let tick = inputs.tick;
    let mut out = String::with_capacity(2048);

    writeln!(out, "## Why you are being consulted").ok();
    for fired in inputs.fired {
        writeln!(out, "- {}: {}", fired.trigger, fired.detail).ok();
    }

    writeln!(out, "\n## Current position").ok();
    writeln!(out, "symbol: {}", tick.symbol).ok();
    writeln!(out, "side: {}", tick.side).ok();
    writeln!(out, "size: {}", tick.size).ok();
    writeln!(out, "entry price: {:.4}", tick.entry_price).ok();
    writeln!(out, "mark price: {:.4}", tick.mark_price).ok();
    writeln!(
        out,
        "unrealized pnl: {:+.2} ({:+.2}% of equity)",
        tick.unrealized_pnl, tick.pnl_pct_of_equity
    )
    .ok();
    match tick.stop_loss_price {
        Some(stop) => writeln!(
            out,
            "stop loss: {:.4} ({:+.2}% from mark)",
            stop,
            signed_distance_pct(tick.mark_price, stop)
        )
        .ok(),
        None => writeln!(out, "stop loss: none").ok(),
    };
    match tick.take_profit_price {
        Some(tp) => writeln!(
            out,
            "take profit: {:.4} ({:+.2}% from mark)",
            tp,
            signed_distance_pct(tick.mark_price, tp)
        )
        .ok(),
        None => writeln!(out, "take profit: none").ok(),
    };
    writeln!(
        out,
        "liquidation: {:.4} ({:.2}% away)",
        tick.liquidation_price, tick.dist_to_liquidation_pct
    )
    .ok();
    writeln!(out, "funding rate: {:+.6}", tick.funding_rate).ok();

    writeln!(out, "\n## Recent trajectory (time, mark, pnl % of equity)").ok();
    for t in inputs.buffer.window(inputs.buffer.capacity()) {
        writeln!(
            out,
            "{} {:.4} {:+.2}%",
            format_time(t.timestamp),
            t.mark_price,
            t.pnl_pct_of_equity
        )
        .ok();
    }

    writeln!(out, "\n## Account").ok();
    writeln!(out, "equity: {:.2}", tick.account_equity).ok();
    writeln!(out, "open positions: {}", inputs.open_positions).ok();
    writeln!(
        out,
        "entries today: {} of {}",
        inputs.account.entries_today, inputs.account.entry_cap
    )
    .ok();
    writeln!(out, "recent streak: {}", streak_label(inputs.account.streak)).ok();
    writeln!(out, "advisor calls left this hour: {}", inputs.budget_remaining).ok();

    writeln!(out, "\n## Position thesis").ok();
    writeln!(
        out,
        "{}",
        inputs.thesis.as_deref().unwrap_or("Not recorded")
    )
    .ok();

    writeln!(out, "\n## Hard risk rules (enforced without you)").ok();
    writeln!(
        out,
        "- position is force-closed below {:.1}% distance to liquidation",
        inputs.breakers.liq_pct
    )
    .ok();
    writeln!(
        out,
        "- position is force-closed below {:.1}% pnl of equity",
        inputs.breakers.loss_pct
    )
    .ok();

    writeln!(out, "\n## Your reply").ok();
    writeln!(
        out,
        "Reply with exactly one JSON object: \
         {{\"action\": \"hold\"}} | \
         {{\"action\": \"tighten_stop\", \"params\": {{\"newStopPrice\": <price>}}}} | \
         {{\"action\": \"adjust_take_profit\", \"params\": {{\"newTpPrice\": <price>}}}} | \
         {{\"action\": \"partial_close\", \"params\": {{\"fractionOfPosition\": <0..1>}}}} | \
         {{\"action\": \"close\"}}. \
         Always include a short \"reason\" field."
    )
    .ok();

    out
}

fn signed_distance_pct(mark: f64, level: f64) -> f64 {
    if !mark.is_finite() || mark == 0.0 {
        return 0.0;
    }
    (level - mark) / mark.abs() * 100.0
}

fn format_time(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}

fn streak_label(streak: i32) -> String {
    match streak {
        0 => "flat".to_string(),
        n if n > 0 => format!("{n} wins"),
        n => format!("{} losses", -n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{PositionSide, Trigger};

    fn tick() -> PositionTick {
        PositionTick {
            timestamp: 1_700_000_000_000,
            symbol: "ETH".into(),
            side: PositionSide::Long,
            size: 5.0,
            entry_price: 2080.0,
            mark_price: 2110.0,
            unrealized_pnl: 150.0,
            pnl_pct_of_equity: 1.5,
            account_equity: 10_000.0,
            margin_used: 1_000.0,
            liquidation_price: 1_800.0,
            dist_to_liquidation_pct: 14.7,
            funding_rate: 0.0001,
            stop_loss_price: Some(2050.0),
            take_profit_price: None,
            stop_loss_order_id: Some("sl-1".into()),
            take_profit_order_id: None,
        }
    }

    #[test]
    fn user_prompt_contains_every_section() {
        let tick = tick();
        let mut buffer = RollingBuffer::new(8);
        buffer.push(tick.clone());
        let fired = vec![FiredTrigger::new(
            Trigger::PnlShift,
            "pnl 1.50% of equity vs 0.00% at last review",
        )];
        let prompt = user_prompt(&PromptInputs {
            tick: &tick,
            buffer: &buffer,
            fired: &fired,
            thesis: None,
            account: Default::default(),
            open_positions: 2,
            breakers: BreakerSettings::default(),
            budget_remaining: 17,
        });
        assert!(prompt.contains("pnl_shift"));
        assert!(prompt.contains("symbol: ETH"));
        assert!(prompt.contains("take profit: none"));
        assert!(prompt.contains("Recent trajectory"));
        assert!(prompt.contains("open positions: 2"));
        assert!(prompt.contains("Not recorded"));
        assert!(prompt.contains("advisor calls left this hour: 17"));
        assert!(prompt.contains("tighten_stop"));
    }

    #[test]
    fn thesis_text_is_embedded_verbatim() {
        let tick = tick();
        let buffer = {
            let mut b = RollingBuffer::new(4);
            b.push(tick.clone());
            b
        };
        let prompt = user_prompt(&PromptInputs {
            tick: &tick,
            buffer: &buffer,
            fired: &[],
            thesis: Some("breakout over 2100 with rising funding".into()),
            account: Default::default(),
            open_positions: 1,
            breakers: BreakerSettings::default(),
            budget_remaining: 20,
        });
        assert!(prompt.contains("breakout over 2100"));
        assert!(!prompt.contains("Not recorded"));
    }

    #[test]
    fn system_prompt_states_the_contract() {
        let prompt = system_prompt();
        assert!(prompt.contains("risk manager"));
        assert!(prompt.contains("single JSON object"));
        assert!(prompt.contains("never widen"));
    }
}
