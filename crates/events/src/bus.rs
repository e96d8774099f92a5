//! Telemetry bus shared by every actor thread of a run.
//!
//! Publishing is synchronous, so actor threads can report without a runtime.
//! Events emitted while nobody is subscribed are counted, not delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{Event, EventEnvelope};

const DEFAULT_CAPACITY: usize = 1000;

/// Broadcast channel for run telemetry.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    unobserved: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus retaining up to `capacity` events per lagging subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            unobserved: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wrap `event` in a fresh envelope and publish it.
    pub fn emit(&self, event: Event) -> usize {
        self.publish(EventEnvelope::new(event))
    }

    /// Returns the number of subscribers the envelope reached.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        match self.sender.send(envelope) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(envelope)) => {
                self.unobserved.fetch_add(1, Ordering::Relaxed);
                trace!(event_id = %envelope.id, "No subscribers for event");
                0
            }
        }
    }

    /// Only events published after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events published while nobody was subscribed.
    pub fn unobserved_count(&self) -> u64 {
        self.unobserved.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("unobserved", &self.unobserved_count())
            .finish()
    }
}
