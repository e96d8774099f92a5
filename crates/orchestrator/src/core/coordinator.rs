//! Phase barrier shared by every actor thread of a run.
//!
//! Each phase is bracketed by two rendezvous points. The start barrier
//! releases once every participant arrived; the end barrier advances the
//! phase counter once every participant finished. Both barriers are
//! generation-tagged so a wakeup for one phase can never release a waiter of
//! the next.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use lockstep_core::PhaseNumber;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Default)]
struct BarrierState {
    required_tokens: u64,
    arrived_start: u64,
    arrived_end: u64,
    /// Incremented each time the start barrier releases.
    start_generation: u64,
    /// Incremented each time the end barrier releases. Equal to the current phase.
    end_generation: u64,
    max_phase: PhaseNumber,
    errored: bool,
    started: bool,
}

impl BarrierState {
    fn running(&self) -> bool {
        self.start_generation > self.end_generation
    }
}

/// Coordinator for lockstep phase progression.
#[derive(Debug, Default)]
pub struct Orchestrator {
    state: Mutex<BarrierState>,
    phase_change: Condvar,
    // Mirrors of `end_generation` and `errored`, written under the lock.
    current_phase: AtomicU64,
    errored: AtomicBool,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, BarrierState>,
        condition: impl FnMut(&mut BarrierState) -> bool,
    ) -> MutexGuard<'a, BarrierState> {
        self.phase_change
            .wait_while(guard, condition)
            .unwrap_or_else(|p| p.into_inner())
    }

    /// Register `count` more participants.
    ///
    /// Only valid before the first phase starts.
    pub fn add_required_tokens(&self, count: u64) -> Result<()> {
        let mut state = self.lock();
        if state.started {
            return Err(OrchestratorError::config(
                "orchestrator",
                "Cannot add required tokens after a phase has started",
            ));
        }
        state.required_tokens += count;
        Ok(())
    }

    pub fn required_tokens(&self) -> u64 {
        self.lock().required_tokens
    }

    /// Block until every participant arrived, then return the running phase.
    pub fn await_phase_start(&self) -> Result<PhaseNumber> {
        let mut state = self.lock();
        state.started = true;

        // A participant that ran ahead waits for the previous phase to drain.
        state = self.wait_while(state, |s| s.running() && !s.errored);
        if state.errored {
            return Err(OrchestratorError::Aborted);
        }

        state.arrived_start += 1;
        if state.arrived_start >= state.required_tokens {
            state.arrived_start = 0;
            state.start_generation += 1;
            debug!(
                phase = state.end_generation,
                participants = state.required_tokens,
                "Phase started"
            );
            self.phase_change.notify_all();
        } else {
            let generation = state.start_generation;
            state = self.wait_while(state, |s| s.start_generation == generation && !s.errored);
            if state.errored {
                return Err(OrchestratorError::Aborted);
            }
        }

        Ok(state.end_generation)
    }

    /// Record the caller as finished with the running phase.
    ///
    /// With `wait_for_others` the call blocks until every participant has
    /// finished. Returns `false` iff the run was aborted.
    pub fn await_phase_end(&self, wait_for_others: bool) -> bool {
        let mut state = self.lock();
        if state.errored {
            return false;
        }
        if !state.running() {
            warn!(
                phase = state.end_generation,
                "Phase end reported while no phase is running"
            );
            return true;
        }

        state.arrived_end += 1;
        if state.arrived_end >= state.required_tokens {
            state.arrived_end = 0;
            state.end_generation += 1;
            self.current_phase
                .store(state.end_generation, Ordering::SeqCst);
            debug!(
                ended = state.end_generation - 1,
                next = state.end_generation,
                "Phase ended"
            );
            self.phase_change.notify_all();
        } else if wait_for_others {
            let generation = state.end_generation;
            state = self.wait_while(state, |s| s.end_generation == generation && !s.errored);
        }

        !state.errored
    }

    /// Block until the current phase is past `from`.
    ///
    /// Used by participants that reported the end of `from` without waiting.
    pub fn await_phase_advance(&self, from: PhaseNumber) -> bool {
        let state = self.lock();
        let state = self.wait_while(state, |s| s.end_generation <= from && !s.errored);
        !state.errored
    }

    /// Ensure at least `phase + 1` phases run.
    pub fn phases_at_least_to(&self, phase: PhaseNumber) {
        let mut state = self.lock();
        state.max_phase = state.max_phase.max(phase);
    }

    pub fn max_phase(&self) -> PhaseNumber {
        self.lock().max_phase
    }

    pub fn more_phases(&self) -> bool {
        let state = self.lock();
        state.end_generation <= state.max_phase && !state.errored
    }

    pub fn current_phase(&self) -> PhaseNumber {
        self.current_phase.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until the run is aborted, whichever comes first.
    ///
    /// Returns `false` iff the run was aborted.
    pub fn sleep_unless_aborted(&self, duration: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .phase_change
            .wait_timeout_while(state, duration, |s| !s.errored)
            .unwrap_or_else(|p| p.into_inner());
        !state.errored
    }

    /// Fail the run and wake every blocked participant.
    pub fn abort(&self) {
        let mut state = self.lock();
        if !state.errored {
            warn!(phase = state.end_generation, "Aborting run");
            state.errored = true;
            self.errored.store(true, Ordering::SeqCst);
        }
        self.phase_change.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_participant_cycles_phases() {
        let orchestrator = Orchestrator::new();
        orchestrator.add_required_tokens(1).unwrap();
        orchestrator.phases_at_least_to(2);

        let mut seen = Vec::new();
        while orchestrator.more_phases() {
            seen.push(orchestrator.await_phase_start().unwrap());
            assert!(orchestrator.await_phase_end(true));
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(orchestrator.current_phase(), 3);
    }

    #[test]
    fn test_tokens_rejected_after_start() {
        let orchestrator = Orchestrator::new();
        orchestrator.add_required_tokens(1).unwrap();
        orchestrator.await_phase_start().unwrap();

        let err = orchestrator.add_required_tokens(1).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(orchestrator.required_tokens(), 1);
    }

    #[test]
    fn test_end_without_running_phase_is_ignored() {
        let orchestrator = Orchestrator::new();
        orchestrator.add_required_tokens(2).unwrap();
        assert!(orchestrator.await_phase_end(true));
        assert_eq!(orchestrator.current_phase(), 0);
    }

    #[test]
    fn test_non_blocking_end_then_advance() {
        let orchestrator = Arc::new(Orchestrator::new());
        orchestrator.add_required_tokens(2).unwrap();

        let other = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                let phase = orchestrator.await_phase_start().unwrap();
                assert!(orchestrator.await_phase_end(false));
                assert!(orchestrator.await_phase_advance(phase));
                orchestrator.current_phase()
            })
        };

        assert_eq!(orchestrator.await_phase_start().unwrap(), 0);
        assert!(orchestrator.await_phase_end(true));
        assert_eq!(other.join().unwrap(), 1);
    }

    #[test]
    fn test_sleep_wakes_on_abort() {
        let orchestrator = Arc::new(Orchestrator::new());
        assert!(orchestrator.sleep_unless_aborted(Duration::from_millis(5)));

        let sleeper = {
            let orchestrator = Arc::clone(&orchestrator);
            thread::spawn(move || {
                let started = std::time::Instant::now();
                let completed = orchestrator.sleep_unless_aborted(Duration::from_secs(30));
                (completed, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        orchestrator.abort();

        let (completed, elapsed) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5), "slept {:?}", elapsed);
        assert!(!orchestrator.sleep_unless_aborted(Duration::from_secs(30)));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let orchestrator = Orchestrator::new();
        orchestrator.abort();
        orchestrator.abort();
        assert!(orchestrator.is_aborted());
        assert!(!orchestrator.more_phases());
        assert!(!orchestrator.await_phase_end(true));
        assert!(!orchestrator.await_phase_advance(0));
        assert!(orchestrator.await_phase_start().unwrap_err().is_aborted());
    }
}
