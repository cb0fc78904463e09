//! The vigil heartbeat engine.
//!
//! Three layers: per-symbol watchers poll position state, a pure trigger
//! evaluator decides whether a tick is significant, and the advisor
//! orchestrator turns significant ticks into validated risk-reducing orders.
//! The supervisor owns watcher lifecycles and the global advisor budget.

pub mod advisor;
pub mod breakers;
pub mod budget;
pub mod settings;
pub mod shutdown;
pub mod snapshot;
pub mod supervisor;
pub mod triggers;
pub mod watcher;

pub use advisor::{AdvisorOrchestrator, AdvisorReview};
pub use budget::AdvisorBudget;
pub use settings::{BreakerSettings, HeartbeatSettings, Timeouts, TriggerSettings};
pub use shutdown::ShutdownSignal;
pub use snapshot::Snapshotter;
pub use supervisor::{Collaborators, HeartbeatSupervisor};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
