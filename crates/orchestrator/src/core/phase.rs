//! Per-actor driver over the orchestrator's phases.
//!
//! ```ignore
//! while let Some(mut phase) = phase_loop.next_phase()? {
//!     for config in phase.iterations() {
//!         // one unit of work
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lockstep_core::PhaseNumber;
use tracing::{debug, trace, warn};

use super::coordinator::Orchestrator;
use super::iteration::{IterationCompletionCheck, IterationTracker};
use crate::context::{ActorContext, PhaseContext};
use crate::error::{OrchestratorError, Result};
use crate::rate_limiter::GlobalRateLimiter;

const DEFAULT_SKIP_FIRST_PAUSE: Duration = Duration::from_secs(1);

struct PhaseEntry<T> {
    config: T,
    check: IterationCompletionCheck,
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
    skip_first_loop: bool,
}

/// What the previous phase still owes the orchestrator.
#[derive(Debug, Clone, Copy)]
enum PendingEnd {
    /// Arrive at the end barrier and wait for everyone.
    Blocking,
    /// Already arrived without waiting; wait for the phase to move on.
    Advance(PhaseNumber),
}

/// Drives one actor instance through every phase of the run.
///
/// Holds one participant token. Dropping a loop that started but did not
/// reach the final phase aborts the run, since the remaining participants
/// could never be released otherwise.
pub struct PhaseLoop<T> {
    actor: String,
    orchestrator: Arc<Orchestrator>,
    phases: BTreeMap<PhaseNumber, PhaseEntry<T>>,
    pending: Option<PendingEnd>,
    skip_first_pause: Duration,
    started: bool,
    finished: bool,
}

impl<T> PhaseLoop<T> {
    /// Build the per-phase configuration of every configured phase and
    /// register this loop as a participant.
    pub fn new<F>(context: &ActorContext, mut factory: F) -> Result<Self>
    where
        F: FnMut(&PhaseContext) -> Result<T>,
    {
        let mut phases = BTreeMap::new();
        for (&number, phase) in context.phases() {
            let config = factory(phase).map_err(|e| e.at(phase.location()))?;
            if let Some(limiter) = phase.rate_limiter() {
                limiter.add_user();
            }
            phases.insert(
                number,
                PhaseEntry {
                    config,
                    check: phase.check(),
                    rate_limiter: phase.rate_limiter().cloned(),
                    skip_first_loop: phase.skip_first_loop(),
                },
            );
        }

        let orchestrator = Arc::clone(context.orchestrator());
        orchestrator.add_required_tokens(1)?;

        Ok(Self {
            actor: context.name().to_string(),
            orchestrator,
            phases,
            pending: None,
            skip_first_pause: DEFAULT_SKIP_FIRST_PAUSE,
            started: false,
            finished: false,
        })
    }

    /// Pause taken in place of the first iteration of a `SkipFirstLoop` phase.
    pub fn with_skip_first_pause(mut self, pause: Duration) -> Self {
        self.skip_first_pause = pause;
        self
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Finish the previous phase and start the next one.
    ///
    /// Returns `Ok(None)` after the final phase and `Err(Aborted)` once the
    /// run was aborted.
    pub fn next_phase(&mut self) -> Result<Option<ActorPhase<'_, T>>> {
        if self.finished {
            return Ok(None);
        }
        self.started = true;

        let ended = match self.pending.take() {
            Some(PendingEnd::Blocking) => self.orchestrator.await_phase_end(true),
            Some(PendingEnd::Advance(from)) => self.orchestrator.await_phase_advance(from),
            None => true,
        };
        if !ended {
            return self.aborted();
        }

        if !self.orchestrator.more_phases() {
            if self.orchestrator.is_aborted() {
                return self.aborted();
            }
            debug!(actor = %self.actor, "No more phases");
            self.finished = true;
            return Ok(None);
        }

        let number = match self.orchestrator.await_phase_start() {
            Ok(number) => number,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        };

        let entry = self.phases.get_mut(&number);
        let blocking = entry.as_ref().map_or(true, |e| e.check.blocks_completion());
        if blocking {
            self.pending = Some(PendingEnd::Blocking);
        } else {
            if !self.orchestrator.await_phase_end(false) {
                self.finished = true;
                return Err(OrchestratorError::Aborted);
            }
            self.pending = Some(PendingEnd::Advance(number));
        }

        trace!(actor = %self.actor, phase = number, blocking, "Phase begun");
        Ok(Some(ActorPhase {
            orchestrator: &self.orchestrator,
            number,
            entry,
            skip_first_pause: self.skip_first_pause,
            tracker: None,
        }))
    }

    fn aborted<R>(&mut self) -> Result<R> {
        self.finished = true;
        Err(OrchestratorError::Aborted)
    }
}

impl<T> Drop for PhaseLoop<T> {
    fn drop(&mut self) {
        if self.started && !self.finished && !self.orchestrator.is_aborted() {
            warn!(
                actor = %self.actor,
                "Phase loop dropped before the final phase - aborting run"
            );
            self.orchestrator.abort();
        }
    }
}

impl<T> std::fmt::Debug for PhaseLoop<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseLoop")
            .field("actor", &self.actor)
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .field("pending", &self.pending)
            .field("finished", &self.finished)
            .finish()
    }
}

/// One phase as seen by one actor.
pub struct ActorPhase<'a, T> {
    orchestrator: &'a Orchestrator,
    number: PhaseNumber,
    entry: Option<&'a mut PhaseEntry<T>>,
    skip_first_pause: Duration,
    tracker: Option<IterationTracker>,
}

impl<'a, T> ActorPhase<'a, T> {
    pub fn number(&self) -> PhaseNumber {
        self.number
    }

    /// This actor's configuration for the phase; `None` when unconfigured.
    pub fn config(&self) -> Option<&T> {
        self.entry.as_deref().map(|e| &e.config)
    }

    pub fn check(&self) -> IterationCompletionCheck {
        self.entry
            .as_deref()
            .map_or(IterationCompletionCheck::Nop, |e| e.check)
    }

    pub fn is_nop(&self) -> bool {
        self.check().is_nop()
    }

    /// Iterations permitted so far in this phase.
    pub fn iteration_count(&self) -> u64 {
        self.tracker.as_ref().map_or(0, IterationTracker::iterations)
    }

    /// Yield the phase configuration once per permitted iteration.
    ///
    /// Calling this again continues the same count and time budget.
    pub fn iterations(&mut self) -> Iterations<'_, T> {
        let check = self.check();
        let number = self.number;
        let tracker = self
            .tracker
            .get_or_insert_with(|| IterationTracker::new(check, number));
        tracker.begin();

        let (config, skip_first, rate_limiter) = match self.entry.as_deref_mut() {
            Some(PhaseEntry {
                config,
                rate_limiter,
                skip_first_loop,
                ..
            }) => (
                Some(&*config),
                Some(skip_first_loop),
                rate_limiter.as_deref(),
            ),
            None => (None, None, None),
        };

        Iterations {
            orchestrator: self.orchestrator,
            config,
            skip_first,
            rate_limiter,
            tracker,
            skip_first_pause: self.skip_first_pause,
        }
    }
}

impl<T> std::fmt::Debug for ActorPhase<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorPhase")
            .field("number", &self.number)
            .field("check", &self.check())
            .field("iterations", &self.iteration_count())
            .finish()
    }
}

/// Iterator returned by [`ActorPhase::iterations`].
pub struct Iterations<'b, T> {
    orchestrator: &'b Orchestrator,
    config: Option<&'b T>,
    skip_first: Option<&'b mut bool>,
    rate_limiter: Option<&'b GlobalRateLimiter>,
    tracker: &'b mut IterationTracker,
    skip_first_pause: Duration,
}

impl<'b, T> Iterations<'b, T> {
    /// Sleep up to `duration`, cut short by the time budget or an abort.
    ///
    /// Returns `false` iff the run was aborted.
    fn pause(&self, duration: Duration) -> bool {
        let duration = match self.tracker.remaining() {
            Some(left) => duration.min(left),
            None => duration,
        };
        if duration.is_zero() {
            return !self.orchestrator.is_aborted();
        }
        self.orchestrator.sleep_unless_aborted(duration)
    }

    /// Sleep one slot plus jitter scaled by how many callers share the limiter.
    fn back_off(&self, limiter: &GlobalRateLimiter) -> bool {
        let rate = limiter.rate_duration();
        let users = limiter.num_users().max(1) as f64;
        let jitter = rate.mul_f64(rand::random::<f64>() * users);
        self.pause(rate + jitter)
    }
}

impl<'b, T> Iterator for Iterations<'b, T> {
    type Item = &'b T;

    fn next(&mut self) -> Option<&'b T> {
        let config = self.config?;
        loop {
            if self.orchestrator.is_aborted() || self.tracker.is_done(self.orchestrator) {
                return None;
            }

            if let Some(skip) = self.skip_first.as_deref_mut() {
                if *skip {
                    *skip = false;
                    self.tracker.record_iteration();
                    if !self.pause(self.skip_first_pause) {
                        return None;
                    }
                    continue;
                }
            }

            if let Some(limiter) = self.rate_limiter {
                if !limiter.try_consume() {
                    if !self.back_off(limiter) {
                        return None;
                    }
                    continue;
                }
            }

            self.tracker.record_iteration();
            return Some(config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkloadContext;
    use events::EventBus;
    use lockstep_core::WorkloadConfig;

    fn actor_context(toml: &str) -> ActorContext {
        let config = WorkloadConfig::from_toml_str(toml).unwrap();
        let actor = config.actors[0].clone();
        let workload = Arc::new(WorkloadContext::new(config, EventBus::new()).unwrap());
        ActorContext::new(workload, actor).unwrap()
    }

    #[test]
    fn test_single_actor_repeat_and_nop() {
        let context = actor_context(
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Type = "Counter"

[[Actors.Phases]]
Repeat = 3
Step = 1

[[Actors.Phases]]
Nop = true

[[Actors.Phases]]
Repeat = 2
Step = 10
"#,
        );
        let mut phase_loop =
            PhaseLoop::new(&context, |phase| phase.get_as::<u64>("Step").map(|s| s.unwrap_or(0)))
                .unwrap();

        let mut total = 0u64;
        let mut numbers = Vec::new();
        while let Some(mut phase) = phase_loop.next_phase().unwrap() {
            numbers.push(phase.number());
            for step in phase.iterations() {
                total += *step;
            }
        }
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(total, 3 + 20);
        assert!(phase_loop.next_phase().unwrap().is_none());
    }

    #[test]
    fn test_skip_first_loop_counts_as_iteration() {
        let context = actor_context(
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Type = "Scanner"

[[Actors.Phases]]
Repeat = 3
SkipFirstLoop = true
"#,
        );
        let mut phase_loop = PhaseLoop::new(&context, |_| Ok(()))
            .unwrap()
            .with_skip_first_pause(Duration::from_millis(1));

        let mut phase = phase_loop.next_phase().unwrap().unwrap();
        assert_eq!(phase.iterations().count(), 2);
        assert_eq!(phase.iteration_count(), 3);
        // A second pass continues the same budget.
        assert_eq!(phase.iterations().count(), 0);
    }

    #[test]
    fn test_abort_interrupts_skip_pause() {
        let context = actor_context(
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Type = "Scanner"

[[Actors.Phases]]
Repeat = 3
SkipFirstLoop = true
"#,
        );
        let mut phase_loop = PhaseLoop::new(&context, |_| Ok(()))
            .unwrap()
            .with_skip_first_pause(Duration::from_secs(30));
        let orchestrator = Arc::clone(phase_loop.orchestrator());
        let aborter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            orchestrator.abort();
        });

        let started = std::time::Instant::now();
        let mut phase = phase_loop.next_phase().unwrap().unwrap();
        assert_eq!(phase.iterations().count(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        aborter.join().unwrap();
    }

    #[test]
    fn test_factory_error_names_phase() {
        let context = actor_context(
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Name = "Picky"
Type = "Scanner"

[[Actors.Phases]]
Repeat = 1
"#,
        );
        let err = PhaseLoop::new(&context, |phase| phase.require::<String>("Collection"))
            .unwrap_err();
        assert!(err.to_string().contains("Picky.phase-0"));
        assert!(err.to_string().contains("Collection"));
    }

    #[test]
    fn test_abort_ends_loop_with_error() {
        let context = actor_context(
            r#"
SchemaVersion = "2018-07-01"

[[Actors]]
Type = "Counter"

[[Actors.Phases]]
Repeat = 1

[[Actors.Phases]]
Repeat = 1
"#,
        );
        let mut phase_loop = PhaseLoop::new(&context, |_| Ok(())).unwrap();
        let orchestrator = Arc::clone(phase_loop.orchestrator());

        {
            let mut phase = phase_loop.next_phase().unwrap().unwrap();
            orchestrator.abort();
            assert_eq!(phase.iterations().count(), 0);
        }
        assert!(phase_loop.next_phase().unwrap_err().is_aborted());
    }
}
