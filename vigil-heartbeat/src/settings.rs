//! Runtime settings for the engine, decoupled from the configuration layer.
//!
//! Configuration enforces the documented ranges once at load time; the engine
//! itself runs on plain `Duration`s and `f64` thresholds so tests can drive
//! millisecond ticks without relaxing those ranges.

use std::collections::HashMap;
use std::time::Duration;

use vigil_config::HeartbeatConfig;
use vigil_core::Trigger;

/// Everything one watcher (and the supervisor) needs to know about cadence,
/// thresholds, and deadlines.
#[derive(Clone, Debug)]
pub struct HeartbeatSettings {
    pub tick_interval: Duration,
    pub supervisor_interval: Duration,
    pub buffer_capacity: usize,
    pub triggers: TriggerSettings,
    pub breakers: BreakerSettings,
    pub max_advisor_calls_per_hour: u32,
    pub advisor_max_tokens: u32,
    pub advisor_temperature: f64,
    pub notify: bool,
    pub timeouts: Timeouts,
    pub snapshot_failure_notify_threshold: u32,
    pub snapshot_failure_fatal_threshold: u32,
}

impl HeartbeatSettings {
    /// Build engine settings from validated configuration.
    #[must_use]
    pub fn from_config(config: &HeartbeatConfig, advisor_temperature: f64) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
            supervisor_interval: Duration::from_secs(config.supervisor_interval_seconds),
            buffer_capacity: config.rolling_buffer_size,
            triggers: TriggerSettings {
                pnl_shift_pct: config.triggers.pnl_shift_pct,
                approaching_stop_pct: config.triggers.approaching_stop_pct,
                approaching_tp_pct: config.triggers.approaching_tp_pct,
                liquidation_proximity_pct: config.triggers.liquidation_proximity_pct,
                funding_spike: config.triggers.funding_spike,
                volatility_spike_pct: config.triggers.volatility_spike_pct,
                volatility_window: config.triggers.volatility_spike_window_ticks,
                time_ceiling: Duration::from_secs(config.triggers.time_ceiling_minutes * 60),
                generic_cooldown: Duration::from_secs(config.triggers.trigger_cooldown_seconds),
                cooldown_overrides: HashMap::new(),
            },
            breakers: BreakerSettings {
                liq_pct: config.circuit_breakers.liq_pct,
                loss_pct: config.circuit_breakers.loss_pct,
            },
            max_advisor_calls_per_hour: config.llm.max_advisor_calls_per_hour,
            advisor_max_tokens: config.llm.max_tokens,
            advisor_temperature: advisor_temperature.min(0.3),
            notify: config.notify,
            timeouts: Timeouts {
                snapshot: Duration::from_secs(config.timeouts.snapshot_secs),
                order: Duration::from_secs(config.timeouts.order_secs),
                llm: Duration::from_secs(config.timeouts.llm_secs),
            },
            snapshot_failure_notify_threshold: config.snapshot_failure_notify_threshold,
            snapshot_failure_fatal_threshold: config.snapshot_failure_fatal_threshold,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self::from_config(&HeartbeatConfig::default(), 0.2)
    }
}

/// Trigger thresholds plus the cooldown resolution chain.
#[derive(Clone, Debug)]
pub struct TriggerSettings {
    pub pnl_shift_pct: f64,
    pub approaching_stop_pct: f64,
    pub approaching_tp_pct: f64,
    pub liquidation_proximity_pct: f64,
    pub funding_spike: f64,
    pub volatility_spike_pct: f64,
    pub volatility_window: usize,
    pub time_ceiling: Duration,
    /// Fallback for triggers without a named default.
    pub generic_cooldown: Duration,
    /// Operator overrides; win over both named defaults and the fallback.
    pub cooldown_overrides: HashMap<Trigger, Duration>,
}

impl TriggerSettings {
    /// Resolved cooldown for `trigger`: override, then named default, then
    /// the generic fallback.
    #[must_use]
    pub fn cooldown(&self, trigger: Trigger) -> Duration {
        self.cooldown_overrides
            .get(&trigger)
            .copied()
            .or_else(|| trigger.default_cooldown())
            .unwrap_or(self.generic_cooldown)
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        HeartbeatSettings::default().triggers
    }
}

/// Hard pre-advisor close thresholds.
#[derive(Clone, Copy, Debug)]
pub struct BreakerSettings {
    pub liq_pct: f64,
    pub loss_pct: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            liq_pct: 2.0,
            loss_pct: -5.0,
        }
    }
}

/// Deadlines for the three suspension points inside a tick.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub snapshot: Duration,
    pub order: Duration,
    pub llm: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            snapshot: Duration::from_secs(10),
            order: Duration::from_secs(15),
            llm: Duration::from_secs(30),
        }
    }
}
