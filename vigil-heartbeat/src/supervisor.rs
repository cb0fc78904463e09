//! Process-wide coordinator: discovers open positions and owns the watcher
//! fleet plus the shared advisor budget.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_broker::{AdvisorModel, Journal, MarketData, Notifier, OrderGateway, TradingContext};
use vigil_core::Symbol;

use crate::budget::AdvisorBudget;
use crate::settings::HeartbeatSettings;
use crate::shutdown::ShutdownSignal;
use crate::watcher::PositionWatcher;

/// The external collaborators the engine consumes, bundled for wiring.
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketData>,
    pub orders: Arc<dyn OrderGateway>,
    pub model: Arc<dyn AdvisorModel>,
    pub journal: Arc<dyn Journal>,
    pub notifier: Arc<dyn Notifier>,
    pub context: Arc<dyn TradingContext>,
}

/// Reconciles the watcher fleet against the venue's open-position list.
///
/// Watchers hold no reference back to the supervisor; lifecycle flows one
/// way through the shared [`ShutdownSignal`] and each watcher's own
/// self-retirement (position gone, breaker close, fatal failures). A retired
/// watcher whose symbol is still open is respawned on the next reconcile.
pub struct HeartbeatSupervisor {
    collab: Collaborators,
    settings: Arc<HeartbeatSettings>,
    budget: Arc<AdvisorBudget>,
    open_positions: Arc<AtomicUsize>,
    watchers: HashMap<Symbol, JoinHandle<()>>,
}

impl HeartbeatSupervisor {
    #[must_use]
    pub fn new(collab: Collaborators, settings: HeartbeatSettings) -> Self {
        let budget = Arc::new(AdvisorBudget::hourly(settings.max_advisor_calls_per_hour));
        Self {
            collab,
            settings: Arc::new(settings),
            budget,
            open_positions: Arc::new(AtomicUsize::new(0)),
            watchers: HashMap::new(),
        }
    }

    /// Budget handle, exposed for wiring and tests.
    #[must_use]
    pub fn budget(&self) -> Arc<AdvisorBudget> {
        self.budget.clone()
    }

    /// Run until `shutdown` trips, then wait for every watcher to finish its
    /// current tick.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        info!(
            venue = self.collab.market.name(),
            interval = ?self.settings.supervisor_interval,
            "heartbeat supervisor started"
        );
        loop {
            self.reconcile(&shutdown).await;
            if !shutdown.sleep(self.settings.supervisor_interval).await {
                break;
            }
        }

        for (symbol, handle) in self.watchers.drain() {
            if let Err(err) = handle.await {
                warn!(symbol = %symbol, error = %err, "watcher join failed");
            }
        }
        info!("heartbeat supervisor stopped");
    }

    async fn reconcile(&mut self, shutdown: &ShutdownSignal) {
        self.watchers.retain(|_, handle| !handle.is_finished());

        let listing = tokio::time::timeout(
            self.settings.timeouts.snapshot,
            self.collab.market.list_open_positions(),
        )
        .await;
        let positions = match listing {
            Ok(Ok(positions)) => positions,
            Ok(Err(err)) => {
                warn!(error = %err, "failed to list open positions; skipping reconcile");
                return;
            }
            Err(_) => {
                warn!("open-position listing timed out; skipping reconcile");
                return;
            }
        };

        let open: HashSet<Symbol> = positions.into_iter().map(|p| p.symbol).collect();
        self.open_positions.store(open.len(), Ordering::SeqCst);

        for symbol in open {
            if !self.watchers.contains_key(&symbol) {
                info!(%symbol, "starting position watcher");
                let handle = PositionWatcher::spawn(
                    symbol.clone(),
                    self.collab.clone(),
                    self.settings.clone(),
                    self.budget.clone(),
                    self.open_positions.clone(),
                    shutdown.clone(),
                );
                self.watchers.insert(symbol, handle);
            }
        }
        // Watchers whose symbol has disappeared observe it on their own next
        // tick, raise position_closed once, and retire themselves.
    }
}
