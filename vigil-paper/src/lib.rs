//! In-process doubles for the heartbeat's collaborators.
//!
//! [`PaperVenue`] backs both the CLI's paper mode and the integration tests:
//! it serves positions, marks and trigger orders from shared mutable state,
//! applies risk-reducing orders to that state, and records every gateway
//! call so tests can assert on dispatch behavior. [`ScriptedAdvisor`] and
//! [`CapturingNotifier`] stand in for the LLM and the notification channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;
use vigil_broker::{
    AdvisorError, AdvisorModel, BrokerError, BrokerResult, ChatMessage, Completion,
    CompletionParams, MarkInfo, MarketData, Notifier, OpenPosition, OrderAck, OrderGateway,
    TriggerOrder, TriggerOrderKind,
};
use vigil_core::Symbol;

const DEFAULT_MIN_ORDER_SIZE: f64 = 0.001;

/// One recorded order-gateway invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    TightenStop { symbol: Symbol, price: f64 },
    AdjustTakeProfit { symbol: Symbol, price: f64 },
    PartialClose { symbol: Symbol, fraction: f64 },
    ClosePosition { symbol: Symbol, reason: String },
}

#[derive(Default)]
struct VenueState {
    equity: f64,
    positions: HashMap<Symbol, OpenPosition>,
    marks: HashMap<Symbol, MarkInfo>,
    trigger_orders: HashMap<Symbol, Vec<TriggerOrder>>,
    min_sizes: HashMap<Symbol, f64>,
    /// Remaining market-data calls that should fail with a transport error.
    failing_calls: u32,
    calls: Vec<GatewayCall>,
    next_order_id: u64,
}

/// Simulated venue implementing both market-data and order-gateway traits.
#[derive(Clone, Default)]
pub struct PaperVenue {
    state: Arc<Mutex<VenueState>>,
}

impl PaperVenue {
    #[must_use]
    pub fn new(equity: f64) -> Self {
        let venue = Self::default();
        venue.lock().equity = equity;
        venue
    }

    fn lock(&self) -> MutexGuard<'_, VenueState> {
        self.state.lock().expect("paper venue mutex poisoned")
    }

    /// Seed an open position together with its initial mark and funding.
    pub fn open_position(&self, position: OpenPosition, mark_price: f64, funding_rate: f64) {
        let mut state = self.lock();
        state.marks.insert(
            position.symbol.clone(),
            MarkInfo {
                mark_price,
                funding_rate,
            },
        );
        state.positions.insert(position.symbol.clone(), position);
    }

    pub fn remove_position(&self, symbol: &str) {
        let mut state = self.lock();
        state.positions.remove(symbol);
        state.trigger_orders.remove(symbol);
    }

    pub fn set_mark(&self, symbol: &str, mark_price: f64) {
        let mut state = self.lock();
        let funding = state.marks.get(symbol).map_or(0.0, |m| m.funding_rate);
        state.marks.insert(
            symbol.to_string(),
            MarkInfo {
                mark_price,
                funding_rate: funding,
            },
        );
    }

    pub fn set_funding(&self, symbol: &str, funding_rate: f64) {
        let mut state = self.lock();
        let mark = state.marks.get(symbol).map_or(0.0, |m| m.mark_price);
        state.marks.insert(
            symbol.to_string(),
            MarkInfo {
                mark_price: mark,
                funding_rate,
            },
        );
    }

    pub fn set_equity(&self, equity: f64) {
        self.lock().equity = equity;
    }

    pub fn set_min_order_size(&self, symbol: &str, minimum: f64) {
        self.lock().min_sizes.insert(symbol.to_string(), minimum);
    }

    /// Place (or replace) a resting stop-loss order.
    pub fn set_stop(&self, symbol: &str, price: f64) {
        self.upsert_trigger_order(symbol, TriggerOrderKind::Sl, price);
    }

    /// Place (or replace) a resting take-profit order.
    pub fn set_take_profit(&self, symbol: &str, price: f64) {
        self.upsert_trigger_order(symbol, TriggerOrderKind::Tp, price);
    }

    /// Fail the next `count` market-data calls with a transport error.
    pub fn fail_next_market_calls(&self, count: u32) {
        self.lock().failing_calls = count;
    }

    /// Every gateway call recorded so far, in dispatch order.
    #[must_use]
    pub fn gateway_calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<OpenPosition> {
        self.lock().positions.get(symbol).cloned()
    }

    #[must_use]
    pub fn stop_price(&self, symbol: &str) -> Option<f64> {
        self.lock()
            .trigger_orders
            .get(symbol)
            .and_then(|orders| {
                orders
                    .iter()
                    .find(|o| o.kind == TriggerOrderKind::Sl)
                    .map(|o| o.trigger_price)
            })
    }

    fn upsert_trigger_order(&self, symbol: &str, kind: TriggerOrderKind, price: f64) {
        let mut state = self.lock();
        state.next_order_id += 1;
        let order = TriggerOrder {
            order_id: format!("paper-{}", state.next_order_id),
            kind,
            trigger_price: price,
        };
        let orders = state.trigger_orders.entry(symbol.to_string()).or_default();
        orders.retain(|o| o.kind != kind);
        orders.push(order);
    }

    fn consume_failure(&self) -> BrokerResult<()> {
        let mut state = self.lock();
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            return Err(BrokerError::Transport(
                "injected paper venue failure".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketData for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn list_open_positions(&self) -> BrokerResult<Vec<OpenPosition>> {
        self.consume_failure()?;
        Ok(self.lock().positions.values().cloned().collect())
    }

    async fn mark(&self, symbol: &str) -> BrokerResult<MarkInfo> {
        let state = self.lock();
        state
            .marks
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::InvalidRequest(format!("unknown symbol {symbol}")))
    }

    async fn equity(&self) -> BrokerResult<f64> {
        Ok(self.lock().equity)
    }

    async fn list_open_trigger_orders(&self, symbol: &str) -> BrokerResult<Vec<TriggerOrder>> {
        Ok(self
            .lock()
            .trigger_orders
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn min_order_size(&self, symbol: &str) -> BrokerResult<f64> {
        Ok(self
            .lock()
            .min_sizes
            .get(symbol)
            .copied()
            .unwrap_or(DEFAULT_MIN_ORDER_SIZE))
    }
}

#[async_trait]
impl OrderGateway for PaperVenue {
    async fn tighten_stop(&self, symbol: &str, new_price: f64) -> BrokerResult<OrderAck> {
        self.require_position(symbol)?;
        self.upsert_trigger_order(symbol, TriggerOrderKind::Sl, new_price);
        let mut state = self.lock();
        state.calls.push(GatewayCall::TightenStop {
            symbol: symbol.to_string(),
            price: new_price,
        });
        Ok(OrderAck::default())
    }

    async fn adjust_take_profit(&self, symbol: &str, new_price: f64) -> BrokerResult<OrderAck> {
        self.require_position(symbol)?;
        self.upsert_trigger_order(symbol, TriggerOrderKind::Tp, new_price);
        let mut state = self.lock();
        state.calls.push(GatewayCall::AdjustTakeProfit {
            symbol: symbol.to_string(),
            price: new_price,
        });
        Ok(OrderAck::default())
    }

    async fn partial_close(&self, symbol: &str, fraction: f64) -> BrokerResult<OrderAck> {
        let mut state = self.lock();
        let Some(position) = state.positions.get_mut(symbol) else {
            return Err(BrokerError::Exchange(format!("no position in {symbol}")));
        };
        position.size *= 1.0 - fraction;
        state.calls.push(GatewayCall::PartialClose {
            symbol: symbol.to_string(),
            fraction,
        });
        Ok(OrderAck::default())
    }

    async fn close_position(&self, symbol: &str, reason: &str) -> BrokerResult<OrderAck> {
        let mut state = self.lock();
        state.positions.remove(symbol);
        state.trigger_orders.remove(symbol);
        state.calls.push(GatewayCall::ClosePosition {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        });
        debug!(symbol, reason, "paper venue closed position");
        Ok(OrderAck::default())
    }
}

impl PaperVenue {
    fn require_position(&self, symbol: &str) -> BrokerResult<()> {
        if self.lock().positions.contains_key(symbol) {
            Ok(())
        } else {
            Err(BrokerError::Exchange(format!("no position in {symbol}")))
        }
    }
}

/// Advisor double replaying queued replies; defaults to `hold` when the
/// queue is empty. Records every prompt it receives.
#[derive(Clone)]
pub struct ScriptedAdvisor {
    replies: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    default_reply: String,
}

impl Default for ScriptedAdvisor {
    fn default() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            default_reply: r#"{"action": "hold", "reason": "paper advisor default"}"#.to_string(),
        }
    }
}

impl ScriptedAdvisor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next raw reply text.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("scripted advisor mutex poisoned")
            .push_back(reply.into());
    }

    /// All prompts seen so far (one `Vec<ChatMessage>` per completion call).
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts
            .lock()
            .expect("scripted advisor mutex poisoned")
            .clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.prompts
            .lock()
            .expect("scripted advisor mutex poisoned")
            .len()
    }
}

#[async_trait]
impl AdvisorModel for ScriptedAdvisor {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: CompletionParams,
    ) -> Result<Completion, AdvisorError> {
        self.prompts
            .lock()
            .expect("scripted advisor mutex poisoned")
            .push(messages.to_vec());
        let content = self
            .replies
            .lock()
            .expect("scripted advisor mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(Completion { content })
    }
}

/// Notifier double collecting every message.
#[derive(Clone, Default)]
pub struct CapturingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl CapturingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("capturing notifier mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, text: &str) {
        self.messages
            .lock()
            .expect("capturing notifier mutex poisoned")
            .push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::PositionSide;

    fn eth_position() -> OpenPosition {
        OpenPosition {
            symbol: "ETH".into(),
            side: PositionSide::Long,
            size: 5.0,
            entry_price: 2080.0,
            liquidation_price: 1800.0,
            margin_used: 1000.0,
        }
    }

    #[tokio::test]
    async fn partial_close_shrinks_the_position() {
        let venue = PaperVenue::new(10_000.0);
        venue.open_position(eth_position(), 2100.0, 0.0001);
        venue.partial_close("ETH", 0.4).await.unwrap();
        let position = venue.position("ETH").unwrap();
        assert!((position.size - 3.0).abs() < 1e-9);
        assert_eq!(venue.gateway_calls().len(), 1);
    }

    #[tokio::test]
    async fn close_removes_position_and_orders() {
        let venue = PaperVenue::new(10_000.0);
        venue.open_position(eth_position(), 2100.0, 0.0001);
        venue.set_stop("ETH", 2050.0);
        venue.close_position("ETH", "test").await.unwrap();
        assert!(venue.position("ETH").is_none());
        assert!(venue
            .list_open_trigger_orders("ETH")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn injected_failures_expire() {
        let venue = PaperVenue::new(10_000.0);
        venue.fail_next_market_calls(2);
        assert!(venue.list_open_positions().await.is_err());
        assert!(venue.list_open_positions().await.is_err());
        assert!(venue.list_open_positions().await.is_ok());
    }

    #[tokio::test]
    async fn scripted_advisor_replays_then_defaults() {
        let advisor = ScriptedAdvisor::new();
        advisor.push_reply(r#"{"action": "close", "reason": "scripted"}"#);
        let params = CompletionParams {
            temperature: 0.2,
            max_tokens: 256,
        };
        let first = advisor.complete(&[], params).await.unwrap();
        assert!(first.content.contains("scripted"));
        let second = advisor.complete(&[], params).await.unwrap();
        assert!(second.content.contains("hold"));
        assert_eq!(advisor.call_count(), 2);
    }
}
