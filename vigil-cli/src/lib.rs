//! Library surface of the vigil CLI: logging bootstrap, the HTTP advisor
//! client, and the webhook notifier.

pub mod alerts;
pub mod llm;
pub mod telemetry;
