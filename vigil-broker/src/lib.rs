//! Venue-agnostic traits consumed by the heartbeat runtime.
//!
//! Everything the engine talks to — market data, order management, the LLM,
//! the journal, the notification channel — lives behind one of these traits
//! so connectors and test doubles plug in without touching the engine.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_core::{DecisionRecord, PositionSide, Symbol};

/// Convenience alias for venue results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by market-data and order-gateway
/// implementations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failures (network, connection resets).
    #[error("transport error: {0}")]
    Transport(String),
    /// A collaborator call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Wraps serialization or parsing errors.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The venue responded with a business error (e.g. insufficient margin).
    #[error("exchange error: {0}")]
    Exchange(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

/// An open perpetual position as reported by the venue.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OpenPosition {
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Size in contracts (base units).
    pub size: f64,
    pub entry_price: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
}

/// Mark price and current funding for one symbol.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct MarkInfo {
    pub mark_price: f64,
    pub funding_rate: f64,
}

/// Whether a resting trigger order protects the downside or takes profit.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOrderKind {
    Sl,
    Tp,
}

/// A resting stop-loss or take-profit order.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TriggerOrder {
    pub order_id: String,
    pub kind: TriggerOrderKind,
    pub trigger_price: f64,
}

/// Read-only account and market state provider.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Human-friendly name of the venue, used for logging.
    fn name(&self) -> &str;

    async fn list_open_positions(&self) -> BrokerResult<Vec<OpenPosition>>;

    async fn mark(&self, symbol: &str) -> BrokerResult<MarkInfo>;

    /// Current account equity in the reporting currency.
    async fn equity(&self) -> BrokerResult<f64>;

    async fn list_open_trigger_orders(&self, symbol: &str) -> BrokerResult<Vec<TriggerOrder>>;

    /// Smallest position size the venue accepts for `symbol`.
    async fn min_order_size(&self, symbol: &str) -> BrokerResult<f64>;
}

/// Acknowledgement returned by risk-reducing order operations.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct OrderAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Order-management collaborator. Every operation here reduces risk; the
/// engine never opens or grows a position.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn tighten_stop(&self, symbol: &str, new_price: f64) -> BrokerResult<OrderAck>;

    async fn adjust_take_profit(&self, symbol: &str, new_price: f64) -> BrokerResult<OrderAck>;

    /// Close `fraction` (0, 1) of the position at market.
    async fn partial_close(&self, symbol: &str, fraction: f64) -> BrokerResult<OrderAck>;

    async fn close_position(&self, symbol: &str, reason: &str) -> BrokerResult<OrderAck>;
}

/// Role of a chat message sent to the advisor model.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Sampling bounds for one completion call.
#[derive(Clone, Copy, Debug)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Raw completion text from the model; the orchestrator owns parsing.
#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
}

/// Errors from the LLM collaborator.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("api error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("empty completion")]
    Empty,
}

/// Text-generation collaborator backing the advisor path.
#[async_trait]
pub trait AdvisorModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: CompletionParams,
    ) -> Result<Completion, AdvisorError>;
}

/// Errors from the decision journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only sink for decision artifacts. Implementations must serialize
/// concurrent callers internally and be idempotent on
/// [`DecisionRecord::fingerprint`].
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, record: &DecisionRecord) -> Result<(), JournalError>;
}

/// Best-effort notification channel. Delivery failures are logged by the
/// implementation, never surfaced to the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Account-wide context the advisor prompt embeds alongside the tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountContext {
    pub entries_today: u32,
    pub entry_cap: u32,
    /// Positive = consecutive wins, negative = consecutive losses.
    pub streak: i32,
}

/// Supplies the position thesis and account-wide trading stats. The broader
/// trading agent implements this; the heartbeat only reads it.
#[async_trait]
pub trait TradingContext: Send + Sync {
    async fn account_context(&self) -> AccountContext;

    /// Stored rationale from position entry, if any was recorded.
    async fn thesis(&self, symbol: &str) -> Option<String>;
}

/// Context source that reports nothing; used when the heartbeat runs without
/// the surrounding agent.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTradingContext;

#[async_trait]
impl TradingContext for NullTradingContext {
    async fn account_context(&self) -> AccountContext {
        AccountContext::default()
    }

    async fn thesis(&self, _symbol: &str) -> Option<String> {
        None
    }
}
