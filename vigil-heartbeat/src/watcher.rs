//! Per-symbol polling loop.
//!
//! A watcher owns its rolling buffer and trigger state outright; nothing else
//! touches them, so ticks for one symbol are strictly serialized. The task
//! retires itself when the position disappears, when a circuit breaker closes
//! it, or when snapshot failures pass the fatal threshold.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_core::{Outcome, PositionTick, RollingBuffer, Symbol, TriggerState};

use crate::advisor::{journal_circuit_breaker, journal_position_closed, AdvisorOrchestrator};
use crate::breakers::{self, BreakerTrip};
use crate::budget::AdvisorBudget;
use crate::settings::HeartbeatSettings;
use crate::shutdown::ShutdownSignal;
use crate::snapshot::Snapshotter;
use crate::supervisor::Collaborators;
use crate::triggers::{self, TickFlags};
use crate::now_ms;

const BREAKER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One symbol's heartbeat task.
pub struct PositionWatcher {
    symbol: Symbol,
    collab: Collaborators,
    settings: Arc<HeartbeatSettings>,
    budget: Arc<AdvisorBudget>,
    open_positions: Arc<AtomicUsize>,
    shutdown: ShutdownSignal,
}

impl PositionWatcher {
    pub fn spawn(
        symbol: Symbol,
        collab: Collaborators,
        settings: Arc<HeartbeatSettings>,
        budget: Arc<AdvisorBudget>,
        open_positions: Arc<AtomicUsize>,
        shutdown: ShutdownSignal,
    ) -> JoinHandle<()> {
        let watcher = Self {
            symbol,
            collab,
            settings,
            budget,
            open_positions,
            shutdown,
        };
        tokio::spawn(watcher.run())
    }

    async fn run(self) {
        let symbol = self.symbol.clone();
        info!(%symbol, "position watcher started");

        let snapshotter = Snapshotter::new(
            self.collab.market.clone(),
            self.settings.timeouts.snapshot,
        );
        let advisor = AdvisorOrchestrator::new(
            self.collab.market.clone(),
            self.collab.orders.clone(),
            self.collab.model.clone(),
            self.collab.journal.clone(),
            self.collab.notifier.clone(),
            self.collab.context.clone(),
            self.budget.clone(),
            self.settings.clone(),
            self.open_positions.clone(),
        );

        let mut buffer = RollingBuffer::new(self.settings.buffer_capacity);
        let mut state = TriggerState::default();
        let mut first_tick = true;
        let mut consecutive_failures = 0u32;

        loop {
            // The snapshot is the one cancellable suspension point: a
            // shutdown mid-snapshot discards the tick. Once a tick has data
            // it runs to completion so committed orders are always journaled.
            let snapshot = tokio::select! {
                result = snapshotter.snapshot(&symbol) => result,
                _ = self.shutdown.wait() => break,
            };

            match snapshot {
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        %symbol,
                        error = %err,
                        failures = consecutive_failures,
                        "snapshot failed; skipping tick"
                    );
                    if consecutive_failures == self.settings.snapshot_failure_notify_threshold {
                        self.notify(&format!(
                            "snapshot_failing: {symbol} has missed {consecutive_failures} consecutive ticks ({err})"
                        ))
                        .await;
                    }
                    if consecutive_failures >= self.settings.snapshot_failure_fatal_threshold {
                        error!(%symbol, "persistent snapshot failures; watcher retiring");
                        self.notify(&format!(
                            "watcher for {symbol} gave up after {consecutive_failures} failed snapshots"
                        ))
                        .await;
                        break;
                    }
                }
                Ok(None) => {
                    if first_tick {
                        debug!(%symbol, "no open position; watcher retiring");
                    } else {
                        self.handle_position_closed(&buffer).await;
                    }
                    break;
                }
                Ok(Some(tick)) => {
                    consecutive_failures = 0;
                    buffer.push(tick.clone());

                    if let Some(trip) = breakers::check(&tick, &self.settings.breakers) {
                        self.handle_breaker(&tick, &trip).await;
                        break;
                    }

                    let flags = TickFlags {
                        position_opened: first_tick,
                        position_closed: false,
                    };
                    let eval = triggers::evaluate(
                        tick.timestamp,
                        &tick,
                        &buffer,
                        &state,
                        &self.settings.triggers,
                        flags,
                    );
                    state = eval.next_state;

                    if !eval.fired.is_empty() {
                        debug!(
                            %symbol,
                            triggers = ?eval.fired.iter().map(|f| f.trigger.name()).collect::<Vec<_>>(),
                            "significant tick; consulting advisor"
                        );
                        let review = advisor.review(&tick, &buffer, &eval.fired).await;
                        if review.committed {
                            triggers::commit_advisor_state(&mut state, &tick);
                        }
                    }
                    first_tick = false;
                }
            }

            if !self.shutdown.sleep(self.settings.tick_interval).await {
                break;
            }
        }
        info!(%symbol, "position watcher stopped");
    }

    /// Hard close, no advisor, no rate limit. The close is idempotent and
    /// retried once before the failure is surfaced.
    async fn handle_breaker(&self, tick: &PositionTick, trip: &BreakerTrip) {
        let symbol = self.symbol.as_str();
        let reason = trip.reason();
        error!(symbol, %reason, "circuit breaker tripped; closing position");

        let deadline = self.settings.timeouts.order;
        let mut result = tokio::time::timeout(
            deadline,
            self.collab.orders.close_position(symbol, &reason),
        )
        .await;
        if !matches!(result, Ok(Ok(_))) {
            tokio::time::sleep(BREAKER_RETRY_DELAY).await;
            result = tokio::time::timeout(
                deadline,
                self.collab.orders.close_position(symbol, &reason),
            )
            .await;
        }

        let outcome = match result {
            Ok(Ok(_)) => Outcome::Ok,
            Ok(Err(err)) => {
                error!(symbol, error = %err, "circuit-breaker close failed");
                self.notify(&format!("FAILED circuit-breaker close for {symbol}: {err}"))
                    .await;
                Outcome::Failed
            }
            Err(_) => {
                error!(symbol, "circuit-breaker close timed out");
                self.notify(&format!("FAILED circuit-breaker close for {symbol}: timeout"))
                    .await;
                Outcome::Failed
            }
        };

        journal_circuit_breaker(&self.collab.journal, tick, outcome, trip.detail()).await;
        if outcome == Outcome::Ok {
            self.notify(&format!("Circuit breaker closed {symbol}: {reason}"))
                .await;
        }
    }

    async fn handle_position_closed(&self, buffer: &RollingBuffer) {
        let symbol = self.symbol.as_str();
        info!(symbol, "position closed; tearing down watcher state");
        journal_position_closed(&self.collab.journal, symbol, now_ms(), buffer.latest()).await;
        self.notify(&format!("{symbol} position closed")).await;
    }

    async fn notify(&self, text: &str) {
        if self.settings.notify {
            self.collab.notifier.notify(text).await;
        }
    }
}
