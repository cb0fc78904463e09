//! Advisor orchestration: rate limit, prompt, completion, parse, validate,
//! dispatch, journal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;
use vigil_broker::{
    AdvisorModel, BrokerError, ChatMessage, CompletionParams, Journal, MarketData, Notifier,
    OrderGateway, TradingContext,
};
use vigil_core::{
    AdvisorAction, AdvisorDecision, DecisionRecord, FiredTrigger, Outcome, PositionTick,
    RecordKind, RollingBuffer, Trigger,
};

mod parse;
mod prompt;
mod validate;

pub use parse::{parse_reply, ParseError};
pub use prompt::{system_prompt, user_prompt, PromptInputs};
pub use validate::{validate, Rejection};

use crate::budget::AdvisorBudget;
use crate::settings::HeartbeatSettings;

/// Delay before the single retry of an idempotent order operation.
const DISPATCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Idempotent order operations eligible for the single retry.
enum OrderCall {
    TightenStop(f64),
    AdjustTakeProfit(f64),
    Close(String),
}

/// Outcome of one advisory pass, as seen by the watcher.
#[derive(Clone, Copy, Debug)]
pub struct AdvisorReview {
    pub outcome: Outcome,
    /// Whether the watcher should move the advisor reference state. False
    /// only for budget skips, so a later tick can still consult the advisor.
    pub committed: bool,
}

/// Runs the advisor path for one watcher. Shared collaborators arrive as
/// trait objects; the budget is the only cross-symbol state.
pub struct AdvisorOrchestrator {
    market: Arc<dyn MarketData>,
    orders: Arc<dyn OrderGateway>,
    model: Arc<dyn AdvisorModel>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    context: Arc<dyn TradingContext>,
    budget: Arc<AdvisorBudget>,
    settings: Arc<HeartbeatSettings>,
    open_positions: Arc<AtomicUsize>,
}

impl AdvisorOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<dyn MarketData>,
        orders: Arc<dyn OrderGateway>,
        model: Arc<dyn AdvisorModel>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
        context: Arc<dyn TradingContext>,
        budget: Arc<AdvisorBudget>,
        settings: Arc<HeartbeatSettings>,
        open_positions: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            market,
            orders,
            model,
            journal,
            notifier,
            context,
            budget,
            settings,
            open_positions,
        }
    }

    /// Run the full advisory pass for one significant tick.
    pub async fn review(
        &self,
        tick: &PositionTick,
        buffer: &RollingBuffer,
        fired: &[FiredTrigger],
    ) -> AdvisorReview {
        let symbol = tick.symbol.as_str();

        if !self.budget.try_acquire(tick.timestamp) {
            info!(symbol, "advisor budget exhausted; skipping review");
            self.journal_outcome(tick, fired, None, Outcome::Skipped, Some("advisor budget exhausted".into()))
                .await;
            return AdvisorReview {
                outcome: Outcome::Skipped,
                committed: false,
            };
        }

        let account = self.context.account_context().await;
        let thesis = self.context.thesis(symbol).await;
        let messages = [
            ChatMessage::system(system_prompt()),
            ChatMessage::user(user_prompt(&PromptInputs {
                tick,
                buffer,
                fired,
                thesis,
                account,
                open_positions: self.open_positions.load(Ordering::SeqCst),
                breakers: self.settings.breakers,
                budget_remaining: self.budget.remaining(tick.timestamp),
            })),
        ];
        let params = CompletionParams {
            temperature: self.settings.advisor_temperature,
            max_tokens: self.settings.advisor_max_tokens,
        };

        let completion = tokio::time::timeout(
            self.settings.timeouts.llm,
            self.model.complete(&messages, params),
        )
        .await;
        let content = match completion {
            Ok(Ok(reply)) => reply.content,
            Ok(Err(err)) => {
                warn!(symbol, error = %err, "advisor completion failed");
                self.journal_outcome(tick, fired, None, Outcome::Failed, Some(err.to_string()))
                    .await;
                return AdvisorReview {
                    outcome: Outcome::Failed,
                    committed: true,
                };
            }
            Err(_) => {
                warn!(symbol, "advisor completion timed out");
                self.journal_outcome(
                    tick,
                    fired,
                    None,
                    Outcome::Failed,
                    Some(format!("llm timeout after {:?}", self.settings.timeouts.llm)),
                )
                .await;
                return AdvisorReview {
                    outcome: Outcome::Failed,
                    committed: true,
                };
            }
        };

        let decision = match parse_reply(&content) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(symbol, error = %err, "unparseable advisor reply");
                self.journal_outcome(
                    tick,
                    fired,
                    None,
                    Outcome::Failed,
                    Some(format!("unparseable reply: {err}")),
                )
                .await;
                return AdvisorReview {
                    outcome: Outcome::Failed,
                    committed: true,
                };
            }
        };

        let min_order_size = match &decision.action {
            AdvisorAction::PartialClose { .. } => {
                match tokio::time::timeout(
                    self.settings.timeouts.snapshot,
                    self.market.min_order_size(symbol),
                )
                .await
                {
                    Ok(Ok(minimum)) => minimum,
                    Ok(Err(err)) => {
                        warn!(symbol, error = %err, "minimum order size unavailable");
                        self.journal_outcome(
                            tick,
                            fired,
                            Some(decision.clone()),
                            Outcome::Failed,
                            Some(format!("minimum order size unavailable: {err}")),
                        )
                        .await;
                        return AdvisorReview {
                            outcome: Outcome::Failed,
                            committed: true,
                        };
                    }
                    Err(_) => {
                        self.journal_outcome(
                            tick,
                            fired,
                            Some(decision.clone()),
                            Outcome::Failed,
                            Some("minimum order size lookup timed out".into()),
                        )
                        .await;
                        return AdvisorReview {
                            outcome: Outcome::Failed,
                            committed: true,
                        };
                    }
                }
            }
            _ => 0.0,
        };

        if let Err(rejection) = validate(&decision.action, tick, min_order_size) {
            warn!(symbol, action = decision.action.name(), reason = %rejection, "advisor action rejected");
            self.notify(&format!(
                "{symbol}: rejected advisor {} ({rejection})",
                decision.action.name()
            ))
            .await;
            self.journal_outcome(
                tick,
                fired,
                Some(decision),
                Outcome::Rejected,
                Some(rejection.to_string()),
            )
            .await;
            return AdvisorReview {
                outcome: Outcome::Rejected,
                committed: true,
            };
        }

        match self.dispatch(symbol, &decision).await {
            Ok(()) => {
                if !matches!(decision.action, AdvisorAction::Hold) {
                    info!(symbol, action = decision.action.name(), "advisor action dispatched");
                    self.notify(&format!(
                        "{symbol}: {} ({})",
                        describe(&decision.action),
                        decision.reason
                    ))
                    .await;
                }
                self.journal_outcome(tick, fired, Some(decision), Outcome::Ok, None).await;
                AdvisorReview {
                    outcome: Outcome::Ok,
                    committed: true,
                }
            }
            Err(err) => {
                warn!(symbol, action = decision.action.name(), error = %err, "advisor dispatch failed");
                self.notify(&format!(
                    "{symbol}: failed to dispatch {} ({err})",
                    decision.action.name()
                ))
                .await;
                self.journal_outcome(
                    tick,
                    fired,
                    Some(decision),
                    Outcome::Failed,
                    Some(err.to_string()),
                )
                .await;
                AdvisorReview {
                    outcome: Outcome::Failed,
                    committed: true,
                }
            }
        }
    }

    /// Translate the validated action into order-gateway calls. Price-set
    /// operations and closes get one retry; partial closes never do.
    async fn dispatch(&self, symbol: &str, decision: &AdvisorDecision) -> Result<(), BrokerError> {
        let deadline = self.settings.timeouts.order;
        match &decision.action {
            AdvisorAction::Hold => Ok(()),
            AdvisorAction::PartialClose {
                fraction_of_position,
            } => {
                // Not idempotent: a duplicate would double the cut.
                bounded(
                    deadline,
                    self.orders.partial_close(symbol, *fraction_of_position),
                )
                .await
                .map(|_| ())
            }
            AdvisorAction::TightenStop { new_stop_price } => {
                self.place_with_retry(symbol, &OrderCall::TightenStop(*new_stop_price))
                    .await
            }
            AdvisorAction::AdjustTakeProfit { new_tp_price } => {
                self.place_with_retry(symbol, &OrderCall::AdjustTakeProfit(*new_tp_price))
                    .await
            }
            AdvisorAction::Close => {
                let reason = if decision.reason.is_empty() {
                    "advisor_close".to_string()
                } else {
                    format!("advisor: {}", decision.reason)
                };
                self.place_with_retry(symbol, &OrderCall::Close(reason)).await
            }
        }
    }

    async fn place(&self, symbol: &str, call: &OrderCall) -> Result<(), BrokerError> {
        let deadline = self.settings.timeouts.order;
        let result = match call {
            OrderCall::TightenStop(price) => {
                bounded(deadline, self.orders.tighten_stop(symbol, *price)).await
            }
            OrderCall::AdjustTakeProfit(price) => {
                bounded(deadline, self.orders.adjust_take_profit(symbol, *price)).await
            }
            OrderCall::Close(reason) => {
                bounded(deadline, self.orders.close_position(symbol, reason)).await
            }
        };
        result.map(|_| ())
    }

    async fn place_with_retry(&self, symbol: &str, call: &OrderCall) -> Result<(), BrokerError> {
        match self.place(symbol, call).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(symbol, error = %first, "order call failed; retrying once");
                tokio::time::sleep(DISPATCH_RETRY_DELAY).await;
                self.place(symbol, call).await
            }
        }
    }

    async fn journal_outcome(
        &self,
        tick: &PositionTick,
        fired: &[FiredTrigger],
        decision: Option<AdvisorDecision>,
        outcome: Outcome,
        detail: Option<String>,
    ) {
        let record = DecisionRecord {
            id: Uuid::new_v4(),
            kind: RecordKind::PositionHeartbeat,
            symbol: tick.symbol.clone(),
            timestamp: tick.timestamp,
            recorded_at: Utc::now(),
            triggers: fired.iter().map(|f| f.trigger).collect(),
            decision,
            outcome,
            detail,
            snapshot: Some(tick.summary()),
        };
        if let Err(err) = self.journal.record(&record).await {
            warn!(symbol = %tick.symbol, error = %err, "failed to journal advisory");
        }
    }

    async fn notify(&self, text: &str) {
        if self.settings.notify {
            self.notifier.notify(text).await;
        }
    }
}

/// Journal and notify a circuit-breaker close. Lives here so the watcher and
/// the orchestrator share one record shape.
pub async fn journal_circuit_breaker(
    journal: &Arc<dyn Journal>,
    tick: &PositionTick,
    outcome: Outcome,
    detail: String,
) {
    let record = DecisionRecord {
        id: Uuid::new_v4(),
        kind: RecordKind::CircuitBreaker,
        symbol: tick.symbol.clone(),
        timestamp: tick.timestamp,
        recorded_at: Utc::now(),
        triggers: Vec::new(),
        decision: None,
        outcome,
        detail: Some(detail),
        snapshot: Some(tick.summary()),
    };
    if let Err(err) = journal.record(&record).await {
        warn!(symbol = %tick.symbol, error = %err, "failed to journal circuit breaker");
    }
}

/// Journal the closure of a position (no advisory is run).
pub async fn journal_position_closed(
    journal: &Arc<dyn Journal>,
    symbol: &str,
    closed_at_ms: i64,
    last_tick: Option<&PositionTick>,
) {
    let record = DecisionRecord {
        id: Uuid::new_v4(),
        kind: RecordKind::PositionHeartbeat,
        symbol: symbol.to_string(),
        timestamp: closed_at_ms,
        recorded_at: Utc::now(),
        triggers: vec![Trigger::PositionClosed],
        decision: None,
        outcome: Outcome::Info,
        detail: Some("position no longer open".into()),
        snapshot: last_tick.map(PositionTick::summary),
    };
    if let Err(err) = journal.record(&record).await {
        warn!(symbol, error = %err, "failed to journal position close");
    }
}

fn describe(action: &AdvisorAction) -> String {
    match action {
        AdvisorAction::Hold => "hold".to_string(),
        AdvisorAction::TightenStop { new_stop_price } => {
            format!("stop tightened to {new_stop_price}")
        }
        AdvisorAction::AdjustTakeProfit { new_tp_price } => {
            format!("take-profit moved to {new_tp_price}")
        }
        AdvisorAction::PartialClose {
            fraction_of_position,
        } => format!(
            "closed {:.0}% of the position",
            fraction_of_position * 100.0
        ),
        AdvisorAction::Close => "position closed".to_string(),
    }
}

async fn bounded<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(BrokerError::Timeout(deadline)),
    }
}
