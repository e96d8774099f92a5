//! Folding the event stream into a per-run summary

use std::collections::BTreeMap;
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::types::{Event, EventEnvelope, OperationData};

/// Aggregate counters for one `actor.operation` pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub completed: u64,
    pub failed: u64,
    pub documents: u64,
    pub bytes: u64,
    pub total_duration_us: u64,
}

impl OperationStats {
    fn add(&mut self, data: &OperationData) {
        self.documents += data.documents;
        self.bytes += data.bytes;
        self.total_duration_us += data.duration_us;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Keyed by `"<actor>.<operation>"`
    pub operations: BTreeMap<String, OperationStats>,
    pub actors_started: u64,
    pub actors_failed: u64,
    /// Events missed because the collector fell behind
    pub lagged: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunSummary {
    pub fn record(&mut self, event: &Event) {
        match event {
            Event::ActorStarted { .. } => self.actors_started += 1,
            Event::ActorFinished { success, .. } => {
                if !success {
                    self.actors_failed += 1;
                }
            }
            Event::OperationCompleted {
                actor,
                operation,
                data,
                ..
            } => {
                let stats = self.stats_mut(actor, operation);
                stats.completed += 1;
                stats.add(data);
            }
            Event::OperationFailed {
                actor,
                operation,
                data,
                ..
            } => {
                let stats = self.stats_mut(actor, operation);
                stats.failed += 1;
                stats.add(data);
            }
            Event::RunAborted { reason } => {
                self.aborted.get_or_insert_with(|| reason.clone());
            }
            Event::Error { .. } => {}
        }
    }

    pub fn total_completed(&self) -> u64 {
        self.operations.values().map(|s| s.completed).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.operations.values().map(|s| s.failed).sum()
    }

    fn stats_mut(&mut self, actor: &str, operation: &str) -> &mut OperationStats {
        self.operations
            .entry(format!("{}.{}", actor, operation))
            .or_default()
    }
}

/// Background thread that subscribes to a bus and builds a [`RunSummary`]
///
/// The collector stops once every clone of the bus has been dropped.
pub struct SummaryCollector {
    handle: JoinHandle<RunSummary>,
}

impl SummaryCollector {
    pub fn spawn(bus: &EventBus) -> std::io::Result<Self> {
        let mut rx = bus.subscribe();
        let handle = std::thread::Builder::new()
            .name("summary-collector".to_string())
            .spawn(move || {
                let mut summary = RunSummary::default();
                loop {
                    match rx.blocking_recv() {
                        Ok(EventEnvelope { event, .. }) => summary.record(&event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Summary collector lagged behind the event bus");
                            summary.lagged += missed;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                debug!(
                    completed = summary.total_completed(),
                    failed = summary.total_failed(),
                    "Summary collector finished"
                );
                summary
            })?;
        Ok(Self { handle })
    }

    /// Wait for the bus to close and return what was collected
    pub fn finish(self) -> RunSummary {
        self.handle.join().unwrap_or_else(|_| {
            warn!("Summary collector panicked");
            RunSummary::default()
        })
    }
}
