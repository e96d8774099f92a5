//! Per-operation timing handles
//!
//! An actor creates one [`Operation`] per kind of work it does, then calls
//! [`Operation::start`] around each unit of work. The returned context
//! publishes an outcome event exactly once.

use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use crate::bus::EventBus;
use crate::types::{Event, OperationData};

/// A named operation owned by one actor thread
#[derive(Debug, Clone)]
pub struct Operation {
    bus: EventBus,
    actor: Arc<str>,
    actor_id: u64,
    name: Arc<str>,
}

impl Operation {
    pub fn new(bus: EventBus, actor: &str, actor_id: u64, name: &str) -> Self {
        Self {
            bus,
            actor: Arc::from(actor),
            actor_id,
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin timing one unit of work
    pub fn start(&self) -> OperationContext<'_> {
        OperationContext {
            operation: self,
            started: Instant::now(),
            documents: 0,
            bytes: 0,
            finished: false,
        }
    }

    fn publish(&self, data: OperationData, error: Option<String>) {
        let event = match error {
            None => Event::OperationCompleted {
                actor: self.actor.to_string(),
                actor_id: self.actor_id,
                operation: self.name.to_string(),
                data,
            },
            Some(error) => Event::OperationFailed {
                actor: self.actor.to_string(),
                actor_id: self.actor_id,
                operation: self.name.to_string(),
                data,
                error,
            },
        };
        self.bus.emit(event);
    }
}

/// One in-flight unit of work
///
/// Dropping the context without calling [`success`](Self::success) or
/// [`failure`](Self::failure) records a failure.
#[must_use = "an operation context records a failure if dropped without an outcome"]
pub struct OperationContext<'a> {
    operation: &'a Operation,
    started: Instant,
    documents: u64,
    bytes: u64,
    finished: bool,
}

impl OperationContext<'_> {
    pub fn add_documents(&mut self, count: u64) {
        self.documents += count;
    }

    pub fn add_bytes(&mut self, count: u64) {
        self.bytes += count;
    }

    pub fn success(mut self) {
        self.finish(None);
    }

    pub fn failure(mut self, error: impl std::fmt::Display) {
        self.finish(Some(error.to_string()));
    }

    fn finish(&mut self, error: Option<String>) {
        self.finished = true;
        let data = OperationData {
            documents: self.documents,
            bytes: self.bytes,
            duration_us: self.started.elapsed().as_micros() as u64,
        };
        self.operation.publish(data, error);
    }
}

impl Drop for OperationContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            trace!(
                operation = %self.operation.name,
                "Operation context dropped without an outcome"
            );
            self.finish(Some("dropped without an outcome".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventEnvelope;

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<EventEnvelope>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    #[test]
    fn test_success_publishes_counters() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let op = Operation::new(bus, "HelloWorld", 4, "Write");

        let mut ctx = op.start();
        ctx.add_documents(2);
        ctx.add_bytes(10);
        ctx.add_bytes(3);
        ctx.success();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::OperationCompleted {
                actor,
                actor_id,
                operation,
                data,
            } => {
                assert_eq!(actor, "HelloWorld");
                assert_eq!(*actor_id, 4);
                assert_eq!(operation, "Write");
                assert_eq!(data.documents, 2);
                assert_eq!(data.bytes, 13);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_failure_publishes_error() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let op = Operation::new(bus, "Loader", 1, "Insert");

        op.start().failure("duplicate key");

        let events = drain(&mut rx);
        assert!(matches!(
            &events[..],
            [Event::OperationFailed { error, .. }] if error == "duplicate key"
        ));
    }

    #[test]
    fn test_drop_without_outcome_is_a_failure() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let op = Operation::new(bus, "Loader", 1, "Insert");

        {
            let mut ctx = op.start();
            ctx.add_documents(1);
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::OperationFailed { .. }));
    }
}
