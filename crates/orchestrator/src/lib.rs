//! Phase-synchronized multi-actor workload engine.
//!
//! A [`Workload`] turns a parsed [`WorkloadConfig`](lockstep_core::WorkloadConfig)
//! into actor instances, each driving a [`PhaseLoop`] against one shared
//! [`Orchestrator`]. [`WorkloadExecutor`] runs them on native threads.

pub mod actors;
pub mod cast;
pub mod context;
pub mod core;
pub mod error;
pub mod executor;
pub mod rate_limiter;
pub mod resources;

pub use cast::{Actor, ActorProducer, Cast, DefaultActorProducer};
pub use context::{
    ActorContext, ActorId, PhaseContext, ProducedActor, SharedStateRegistry, Workload,
    WorkloadContext,
};
pub use crate::core::{
    ActorPhase, IterationCompletionCheck, Iterations, Orchestrator, PhaseLoop,
    PHASE_CHECK_INTERVAL,
};
pub use error::{OrchestratorError, Result};
pub use executor::{RunReport, WorkloadExecutor};
pub use rate_limiter::{Clock, GlobalRateLimiter, SteadyClock};
