use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use events::{Event, EventBus};
use lockstep_core::PhaseNumber;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::{ProducedActor, Workload};
use crate::core::Orchestrator;
use crate::error::{OrchestratorError, Result};
use crate::resources::AbortGuard;

/// Outcome of a run that finished without failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub actors: usize,
    pub phases: PhaseNumber,
    pub elapsed: Duration,
}

/// Runs every actor of a [`Workload`] on its own thread.
pub struct WorkloadExecutor {
    workload: Workload,
}

impl WorkloadExecutor {
    pub fn new(workload: Workload) -> Self {
        Self { workload }
    }

    /// Run the workload to completion.
    ///
    /// The first actor failure aborts the run; that failure is returned once
    /// every thread has been joined.
    pub fn run(self) -> Result<RunReport> {
        let (context, actors) = self.workload.into_actors();
        let orchestrator = Arc::clone(context.orchestrator());
        let bus = context.events().clone();
        let first_failure: Arc<Mutex<Option<OrchestratorError>>> = Arc::new(Mutex::new(None));

        let actor_count = actors.len();
        info!(
            actors = actor_count,
            phases = orchestrator.max_phase() + 1,
            "Starting workload"
        );
        let started = Instant::now();

        let mut handles = Vec::with_capacity(actor_count);
        for produced in actors {
            let thread_name = format!("{}-{}", produced.name, produced.actor.id());
            let spawned = thread::Builder::new().name(thread_name.clone()).spawn({
                let orchestrator = Arc::clone(&orchestrator);
                let bus = bus.clone();
                let first_failure = Arc::clone(&first_failure);
                move || run_actor(produced, orchestrator, bus, first_failure)
            });
            match spawned {
                Ok(handle) => handles.push((thread_name, handle)),
                Err(err) => {
                    error!(thread = %thread_name, error = %err, "Failed to spawn actor thread");
                    orchestrator.abort();
                    record_failure(&first_failure, OrchestratorError::Io(err));
                    break;
                }
            }
        }
        drop(context);

        for (thread_name, handle) in handles {
            if handle.join().is_err() {
                record_failure(
                    &first_failure,
                    OrchestratorError::ActorPanicked { actor: thread_name },
                );
            }
        }

        let failure = first_failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let elapsed = started.elapsed();

        if let Some(err) = failure {
            bus.emit(Event::RunAborted {
                reason: err.to_string(),
            });
            return Err(err);
        }
        if orchestrator.is_aborted() {
            bus.emit(Event::RunAborted {
                reason: "aborted".to_string(),
            });
            return Err(OrchestratorError::Aborted);
        }

        let report = RunReport {
            actors: actor_count,
            phases: orchestrator.current_phase(),
            elapsed,
        };
        info!(
            actors = report.actors,
            phases = report.phases,
            elapsed_ms = elapsed.as_millis() as u64,
            "Workload completed"
        );
        Ok(report)
    }
}

fn run_actor(
    produced: ProducedActor,
    orchestrator: Arc<Orchestrator>,
    bus: EventBus,
    first_failure: Arc<Mutex<Option<OrchestratorError>>>,
) {
    let ProducedActor { name, mut actor } = produced;
    let actor_id = actor.id();
    let mut guard = AbortGuard::new(orchestrator, format!("{}-{}", name, actor_id));

    bus.emit(Event::ActorStarted {
        actor: name.clone(),
        actor_id,
    });

    let result = actor.run();
    let success = result.is_ok();
    match result {
        Ok(()) => guard.mark_completed(),
        Err(err) if is_abort(&err) => {
            warn!(actor = %name, actor_id, "Actor stopped by abort");
            guard.mark_completed();
        }
        Err(err) => {
            let reason = format!("{:#}", err);
            record_failure(
                &first_failure,
                OrchestratorError::actor_failed(&name, &reason),
            );
            guard.mark_failed(&reason);
        }
    }

    bus.emit(Event::ActorFinished {
        actor: name,
        actor_id,
        success,
    });
}

fn is_abort(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OrchestratorError>()
        .is_some_and(OrchestratorError::is_aborted)
}

fn record_failure(slot: &Mutex<Option<OrchestratorError>>, err: OrchestratorError) {
    let mut slot = slot.lock().unwrap_or_else(|p| p.into_inner());
    if slot.is_none() {
        *slot = Some(err);
    }
}
