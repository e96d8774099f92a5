//! Deciding when an actor's per-phase loop stops.

use std::time::{Duration, Instant};

use lockstep_core::{IntegerSpec, PhaseNode, PhaseNumber, RateSpec, TimeSpec};

use crate::core::Orchestrator;
use crate::error::{OrchestratorError, Result};

/// How many completion checks an `UntilPhaseEnd` loop makes between reads of
/// the orchestrator's phase counter.
pub const PHASE_CHECK_INTERVAL: u64 = 8;

/// Stop condition for one actor's work within one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationCompletionCheck {
    /// Run exactly this many iterations.
    Repeat(u64),
    /// Run until this much time has passed since the first iteration.
    Duration(Duration),
    /// Run until the other participants end the phase.
    UntilPhaseEnd,
    /// Do nothing; only take part in the barriers.
    Nop,
}

impl IterationCompletionCheck {
    pub fn new(
        repeat: Option<IntegerSpec>,
        duration: Option<TimeSpec>,
        rate: Option<&RateSpec>,
        nop: bool,
    ) -> Result<Self> {
        if nop {
            return Ok(Self::Nop);
        }

        match (repeat, duration) {
            (Some(_), Some(_)) => Err(OrchestratorError::config(
                "phase",
                "Only one of Repeat or Duration may be specified",
            )),
            (Some(repeat), None) => {
                if repeat.value() == 0 {
                    return Err(OrchestratorError::config(
                        "phase",
                        "Repeat must be positive",
                    ));
                }
                Ok(Self::Repeat(repeat.value()))
            }
            (None, Some(duration)) => {
                if duration.is_zero() {
                    return Err(OrchestratorError::config(
                        "phase",
                        "Duration must be positive",
                    ));
                }
                Ok(Self::Duration(duration.as_duration()))
            }
            (None, None) => {
                if rate.is_some() {
                    return Err(OrchestratorError::config(
                        "phase",
                        "Rate must be specified alongside either Duration or Repeat",
                    ));
                }
                Ok(Self::UntilPhaseEnd)
            }
        }
    }

    pub fn from_node(node: &PhaseNode) -> Result<Self> {
        Self::new(node.repeat, node.duration, node.rate.as_ref(), node.is_nop())
    }

    /// Whether the phase cannot end before this actor finishes its loop.
    pub fn blocks_completion(&self) -> bool {
        !matches!(self, Self::UntilPhaseEnd)
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Self::Nop)
    }
}

/// Runtime progress of one inner loop.
#[derive(Debug)]
pub(crate) struct IterationTracker {
    check: IterationCompletionCheck,
    phase: PhaseNumber,
    iterations: u64,
    started: Option<Instant>,
    checks: u64,
    phase_over: bool,
}

impl IterationTracker {
    pub(crate) fn new(check: IterationCompletionCheck, phase: PhaseNumber) -> Self {
        Self {
            check,
            phase,
            iterations: 0,
            started: None,
            checks: 0,
            phase_over: false,
        }
    }

    /// Start the `Duration` clock if it is not already running.
    pub(crate) fn begin(&mut self) {
        self.started.get_or_insert_with(Instant::now);
    }

    pub(crate) fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    pub(crate) fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Time left in a `Duration` budget; `None` for other checks.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        match self.check {
            IterationCompletionCheck::Duration(limit) => {
                let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
                Some(limit.saturating_sub(elapsed))
            }
            _ => None,
        }
    }

    pub(crate) fn is_done(&mut self, orchestrator: &Orchestrator) -> bool {
        match self.check {
            IterationCompletionCheck::Repeat(limit) => self.iterations >= limit,
            IterationCompletionCheck::Duration(_) => {
                self.remaining().is_some_and(|left| left.is_zero())
            }
            IterationCompletionCheck::UntilPhaseEnd => {
                if !self.phase_over && self.checks % PHASE_CHECK_INTERVAL == 0 {
                    self.phase_over = orchestrator.current_phase() != self.phase;
                }
                self.checks += 1;
                self.phase_over
            }
            IterationCompletionCheck::Nop => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate() -> RateSpec {
        "5 per 1 second".parse().unwrap()
    }

    #[test]
    fn test_nop_wins() {
        let check = IterationCompletionCheck::new(
            Some(IntegerSpec::new(3)),
            Some(TimeSpec::from_secs(1)),
            Some(&rate()),
            true,
        )
        .unwrap();
        assert_eq!(check, IterationCompletionCheck::Nop);
        assert!(check.blocks_completion());
    }

    #[test]
    fn test_repeat_and_duration_conflict() {
        let err = IterationCompletionCheck::new(
            Some(IntegerSpec::new(3)),
            Some(TimeSpec::from_secs(1)),
            None,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Only one of Repeat or Duration"));
    }

    #[test]
    fn test_rate_requires_bound() {
        let err = IterationCompletionCheck::new(None, None, Some(&rate()), false).unwrap_err();
        assert!(err
            .to_string()
            .contains("Rate must be specified alongside either Duration or Repeat"));

        let check =
            IterationCompletionCheck::new(Some(IntegerSpec::new(2)), None, Some(&rate()), false)
                .unwrap();
        assert_eq!(check, IterationCompletionCheck::Repeat(2));
    }

    #[test]
    fn test_zero_bounds_rejected() {
        assert!(IterationCompletionCheck::new(Some(IntegerSpec::new(0)), None, None, false).is_err());
        assert!(
            IterationCompletionCheck::new(None, Some(TimeSpec::from_millis(0)), None, false)
                .is_err()
        );
    }

    #[test]
    fn test_until_phase_end_does_not_block() {
        let check = IterationCompletionCheck::new(None, None, None, false).unwrap();
        assert_eq!(check, IterationCompletionCheck::UntilPhaseEnd);
        assert!(!check.blocks_completion());
    }

    #[test]
    fn test_repeat_tracker() {
        let orchestrator = Orchestrator::new();
        let mut tracker = IterationTracker::new(IterationCompletionCheck::Repeat(2), 0);
        assert!(!tracker.is_done(&orchestrator));
        tracker.record_iteration();
        tracker.record_iteration();
        assert!(tracker.is_done(&orchestrator));
    }

    #[test]
    fn test_until_phase_end_tracker_notices_advance() {
        let orchestrator = Orchestrator::new();
        orchestrator.add_required_tokens(1).unwrap();
        orchestrator.await_phase_start().unwrap();

        let mut tracker = IterationTracker::new(IterationCompletionCheck::UntilPhaseEnd, 0);
        assert!(!tracker.is_done(&orchestrator));

        orchestrator.await_phase_end(true);
        let extra = (0..=PHASE_CHECK_INTERVAL)
            .take_while(|_| !tracker.is_done(&orchestrator))
            .count() as u64;
        assert!(extra < PHASE_CHECK_INTERVAL);
    }
}
