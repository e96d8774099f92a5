//! Telemetry for lockstep runs
//!
//! This crate provides the event bus, the per-operation metrics handle
//! actors report through, and the collector that folds events into a
//! [`RunSummary`].

mod bus;
mod metrics;
mod summary;
mod types;

pub use bus::EventBus;
pub use metrics::{Operation, OperationContext};
pub use summary::{OperationStats, RunSummary, SummaryCollector};
pub use types::*;
