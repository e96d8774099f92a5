//! RAII guard tying an actor thread's fate to the run.
//!
//! This module aborts the orchestrator when an actor thread unwinds or
//! returns without marking itself completed.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::core::Orchestrator;

/// RAII guard for one actor thread.
///
/// When this guard is dropped without being marked as completed, it aborts
/// the orchestrator so that every other actor blocked on a barrier is
/// released. This covers panics as well as early returns.
///
/// # Example
///
/// ```ignore
/// let mut guard = AbortGuard::new(orchestrator, "Loader-3");
/// actor.run()?;
/// guard.mark_completed(); // Must call this on success
/// // If not called, Drop aborts the run
/// ```
pub struct AbortGuard {
    orchestrator: Arc<Orchestrator>,
    actor: String,
    completed: bool,
}

impl AbortGuard {
    pub fn new(orchestrator: Arc<Orchestrator>, actor: impl Into<String>) -> Self {
        let actor = actor.into();
        debug!(actor = %actor, "Abort guard created");

        Self {
            orchestrator,
            actor,
            completed: false,
        }
    }

    /// Mark the actor as completed successfully.
    ///
    /// This prevents the guard from aborting the run on drop.
    pub fn mark_completed(&mut self) {
        debug!(actor = %self.actor, "Actor marked as completed");
        self.completed = true;
    }

    /// Mark the actor as failed and abort the run right away.
    pub fn mark_failed(&mut self, reason: &str) {
        error!(actor = %self.actor, error = %reason, "Actor failed");
        self.orchestrator.abort();
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                actor = %self.actor,
                panicking = std::thread::panicking(),
                "Abort guard dropped without completion - aborting run"
            );
            self.orchestrator.abort();
        }
    }
}
