//! Phase coordination primitives.
//!
//! - [`Orchestrator`] - generational barrier shared by all actor threads
//! - [`PhaseLoop`] - per-actor driver over the outer (phase) and inner
//!   (iteration) sequences
//! - [`IterationCompletionCheck`] - when an actor's per-phase loop stops

mod coordinator;
mod iteration;
mod phase;

pub use coordinator::Orchestrator;
pub use iteration::{IterationCompletionCheck, PHASE_CHECK_INTERVAL};
pub use phase::{ActorPhase, Iterations, PhaseLoop};
