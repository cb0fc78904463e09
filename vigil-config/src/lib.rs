//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl AppConfig {
    /// Check every range constraint; call once after loading.
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()?;
        self.advisor.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            journal: JournalConfig::default(),
            alerting: AlertingConfig::default(),
            advisor: AdvisorConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct AlertingConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Connection settings for the LLM collaborator.
#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorConfig {
    #[serde(default = "default_advisor_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key. The key itself
    /// never lives in configuration files.
    #[serde(default = "default_advisor_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_advisor_model")]
    pub model: String,
    #[serde(default = "default_advisor_temperature")]
    pub temperature: f64,
}

impl AdvisorConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=0.3).contains(&self.temperature) {
            bail!(
                "advisor.temperature {} outside [0.0, 0.3]",
                self.temperature
            );
        }
        Ok(())
    }
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            base_url: default_advisor_base_url(),
            api_key_env: default_advisor_api_key_env(),
            model: default_advisor_model(),
            temperature: default_advisor_temperature(),
        }
    }
}

/// The heartbeat engine's recognized options.
#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_supervisor_interval_seconds")]
    pub supervisor_interval_seconds: u64,
    #[serde(default = "default_rolling_buffer_size")]
    pub rolling_buffer_size: usize,
    #[serde(default)]
    pub triggers: TriggerThresholds,
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerConfig,
    #[serde(default)]
    pub llm: AdvisorBudgetConfig,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_snapshot_failure_notify_threshold")]
    pub snapshot_failure_notify_threshold: u32,
    #[serde(default = "default_snapshot_failure_fatal_threshold")]
    pub snapshot_failure_fatal_threshold: u32,
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if !(5..=600).contains(&self.tick_interval_seconds) {
            bail!(
                "heartbeat.tick_interval_seconds {} outside [5, 600]",
                self.tick_interval_seconds
            );
        }
        if !(1..=10_000).contains(&self.rolling_buffer_size) {
            bail!(
                "heartbeat.rolling_buffer_size {} outside [1, 10000]",
                self.rolling_buffer_size
            );
        }
        if !(1..=10_000).contains(&self.triggers.time_ceiling_minutes) {
            bail!(
                "heartbeat.triggers.time_ceiling_minutes {} outside [1, 10000]",
                self.triggers.time_ceiling_minutes
            );
        }
        if self.triggers.volatility_spike_window_ticks == 0 {
            bail!("heartbeat.triggers.volatility_spike_window_ticks must be positive");
        }
        if self.llm.max_advisor_calls_per_hour == 0 {
            bail!("heartbeat.llm.max_advisor_calls_per_hour must be positive");
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: default_tick_interval_seconds(),
            supervisor_interval_seconds: default_supervisor_interval_seconds(),
            rolling_buffer_size: default_rolling_buffer_size(),
            triggers: TriggerThresholds::default(),
            circuit_breakers: CircuitBreakerConfig::default(),
            llm: AdvisorBudgetConfig::default(),
            notify: true,
            timeouts: TimeoutConfig::default(),
            snapshot_failure_notify_threshold: default_snapshot_failure_notify_threshold(),
            snapshot_failure_fatal_threshold: default_snapshot_failure_fatal_threshold(),
        }
    }
}

/// Thresholds and cooldowns for the trigger catalog.
#[derive(Debug, Deserialize, Clone)]
pub struct TriggerThresholds {
    #[serde(default = "default_pnl_shift_pct")]
    pub pnl_shift_pct: f64,
    #[serde(default = "default_approaching_pct")]
    pub approaching_stop_pct: f64,
    #[serde(default = "default_approaching_pct")]
    pub approaching_tp_pct: f64,
    #[serde(default = "default_liquidation_proximity_pct")]
    pub liquidation_proximity_pct: f64,
    #[serde(default = "default_funding_spike")]
    pub funding_spike: f64,
    #[serde(default = "default_volatility_spike_pct")]
    pub volatility_spike_pct: f64,
    #[serde(default = "default_volatility_spike_window_ticks")]
    pub volatility_spike_window_ticks: usize,
    #[serde(default = "default_time_ceiling_minutes")]
    pub time_ceiling_minutes: u64,
    /// Fallback cooldown for triggers without a named default.
    #[serde(default = "default_trigger_cooldown_seconds")]
    pub trigger_cooldown_seconds: u64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            pnl_shift_pct: default_pnl_shift_pct(),
            approaching_stop_pct: default_approaching_pct(),
            approaching_tp_pct: default_approaching_pct(),
            liquidation_proximity_pct: default_liquidation_proximity_pct(),
            funding_spike: default_funding_spike(),
            volatility_spike_pct: default_volatility_spike_pct(),
            volatility_spike_window_ticks: default_volatility_spike_window_ticks(),
            time_ceiling_minutes: default_time_ceiling_minutes(),
            trigger_cooldown_seconds: default_trigger_cooldown_seconds(),
        }
    }
}

/// Hard, LLM-free safety rails.
#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    /// Full close below this liquidation distance (percent of mark).
    #[serde(default = "default_breaker_liq_pct")]
    pub liq_pct: f64,
    /// Full close below this PnL (percent of equity, negative).
    #[serde(default = "default_breaker_loss_pct")]
    pub loss_pct: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            liq_pct: default_breaker_liq_pct(),
            loss_pct: default_breaker_loss_pct(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorBudgetConfig {
    #[serde(default = "default_max_advisor_calls_per_hour")]
    pub max_advisor_calls_per_hour: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AdvisorBudgetConfig {
    fn default() -> Self {
        Self {
            max_advisor_calls_per_hour: default_max_advisor_calls_per_hour(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Deadlines applied to every suspension point inside a tick.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_snapshot_timeout_secs")]
    pub snapshot_secs: u64,
    #[serde(default = "default_order_timeout_secs")]
    pub order_secs: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            snapshot_secs: default_snapshot_timeout_secs(),
            order_secs: default_order_timeout_secs(),
            llm_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("./data/journal.jsonl")
}

fn default_advisor_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_advisor_api_key_env() -> String {
    "VIGIL_ADVISOR_API_KEY".to_string()
}

fn default_advisor_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_advisor_temperature() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_supervisor_interval_seconds() -> u64 {
    60
}

fn default_rolling_buffer_size() -> usize {
    60
}

fn default_pnl_shift_pct() -> f64 {
    1.5
}

fn default_approaching_pct() -> f64 {
    1.0
}

fn default_liquidation_proximity_pct() -> f64 {
    5.0
}

fn default_funding_spike() -> f64 {
    0.0001
}

fn default_volatility_spike_pct() -> f64 {
    2.0
}

fn default_volatility_spike_window_ticks() -> usize {
    10
}

fn default_time_ceiling_minutes() -> u64 {
    15
}

fn default_trigger_cooldown_seconds() -> u64 {
    180
}

fn default_breaker_liq_pct() -> f64 {
    2.0
}

fn default_breaker_loss_pct() -> f64 {
    -5.0
}

fn default_max_advisor_calls_per_hour() -> u32 {
    20
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_snapshot_timeout_secs() -> u64 {
    10
}

fn default_order_timeout_secs() -> u64 {
    15
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_snapshot_failure_notify_threshold() -> u32 {
    5
}

fn default_snapshot_failure_fatal_threshold() -> u32 {
    10
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml` (optional)
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `VIGIL__`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(false));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("VIGIL")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
