//! Run-scoped state handed to actors while they are being constructed.
//!
//! - [`WorkloadContext`] - everything shared by the whole run
//! - [`ActorContext`] - one `Actors` entry with its parsed phases
//! - [`PhaseContext`] - one phase block, with cascading key lookup
//! - [`Workload`] - a validated run: the context plus the produced actors

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use events::{EventBus, Operation};
use lockstep_core::{ActorConfig, PhaseNode, PhaseNumber, RateSpec, WorkloadConfig};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::cast::{Actor, Cast};
use crate::core::{IterationCompletionCheck, Orchestrator};
use crate::error::{OrchestratorError, Result};
use crate::rate_limiter::GlobalRateLimiter;

pub type ActorId = u64;

/// Lazily-built state shared by every instance of one actor type.
#[derive(Default)]
pub struct SharedStateRegistry {
    states: Mutex<HashMap<(TypeId, TypeId), Arc<dyn Any + Send + Sync>>>,
}

impl SharedStateRegistry {
    pub fn get_or_default<A, S>(&self) -> Arc<S>
    where
        A: 'static,
        S: Default + Send + Sync + 'static,
    {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        let state = states
            .entry((TypeId::of::<A>(), TypeId::of::<S>()))
            .or_insert_with(|| Arc::new(S::default()));
        Arc::clone(state)
            .downcast::<S>()
            .unwrap_or_else(|_| unreachable!("shared state is keyed by its own TypeId"))
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SharedStateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStateRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// State shared by the whole run.
#[derive(Debug)]
pub struct WorkloadContext {
    config: Arc<WorkloadConfig>,
    orchestrator: Arc<Orchestrator>,
    events: EventBus,
    shared: SharedStateRegistry,
    rate_limiters: Mutex<HashMap<String, Arc<GlobalRateLimiter>>>,
    next_actor_id: AtomicU64,
}

impl WorkloadContext {
    pub fn new(config: WorkloadConfig, events: EventBus) -> Result<Self> {
        config.validate_schema()?;
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(Orchestrator::new()),
            events,
            shared: SharedStateRegistry::default(),
            rate_limiters: Mutex::new(HashMap::new()),
            next_actor_id: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn next_actor_id(&self) -> ActorId {
        self.next_actor_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Top-level workload key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.extra.get(key)
    }

    /// State shared by every actor of type `A`.
    pub fn shared_state<A, S>(&self) -> Arc<S>
    where
        A: 'static,
        S: Default + Send + Sync + 'static,
    {
        self.shared.get_or_default::<A, S>()
    }

    /// The limiter registered under `name`, created on first use.
    ///
    /// Asking for an existing name with a different rate is a configuration
    /// error.
    pub fn rate_limiter(&self, name: &str, spec: RateSpec) -> Result<Arc<GlobalRateLimiter>> {
        let mut limiters = self.rate_limiters.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = limiters.get(name) {
            if existing.spec() != spec {
                return Err(OrchestratorError::config(
                    name,
                    format!(
                        "Rate limiter '{}' already defined as '{}', cannot redefine as '{}'",
                        name,
                        existing.spec(),
                        spec
                    ),
                ));
            }
            return Ok(Arc::clone(existing));
        }

        let limiter = Arc::new(GlobalRateLimiter::new(spec).map_err(|e| e.at(name))?);
        debug!(name, rate = %spec, "Rate limiter created");
        limiters.insert(name.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }
}

/// One `Actors` entry with its phases parsed and validated.
#[derive(Debug)]
pub struct ActorContext {
    workload: Arc<WorkloadContext>,
    config: Arc<ActorConfig>,
    phases: BTreeMap<PhaseNumber, PhaseContext>,
}

impl ActorContext {
    pub fn new(workload: Arc<WorkloadContext>, config: ActorConfig) -> Result<Self> {
        let config = Arc::new(config);
        let mut phases = BTreeMap::new();

        for (index, node) in config.phases.iter().enumerate() {
            let number = node.phase.unwrap_or(index as PhaseNumber);
            let location = format!("{}.phase-{}", config.name(), number);
            if phases.contains_key(&number) {
                return Err(OrchestratorError::config(
                    location,
                    format!("Duplicate phase {}", number),
                ));
            }

            let check = IterationCompletionCheck::from_node(node).map_err(|e| e.at(&location))?;
            // Only an explicit `RateLimiterName` shares a limiter across
            // entries; otherwise the phase's threads get their own.
            let rate_limiter = match (node.rate, node.rate_limiter_name.as_deref()) {
                (Some(spec), Some(name)) if !check.is_nop() => {
                    Some(workload.rate_limiter(name, spec).map_err(|e| e.at(&location))?)
                }
                (Some(spec), None) if !check.is_nop() => Some(Arc::new(
                    GlobalRateLimiter::new(spec).map_err(|e| e.at(&location))?,
                )),
                _ => None,
            };

            phases.insert(
                number,
                PhaseContext {
                    number,
                    location,
                    node: node.clone(),
                    check,
                    rate_limiter,
                    actor: Arc::clone(&config),
                    workload: Arc::clone(&workload.config),
                },
            );
        }

        if let Some(&last) = phases.keys().next_back() {
            workload.orchestrator.phases_at_least_to(last);
        }

        Ok(Self {
            workload,
            config,
            phases,
        })
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn actor_type(&self) -> &str {
        &self.config.actor_type
    }

    pub fn threads(&self) -> u64 {
        self.config.threads.value()
    }

    pub fn config(&self) -> &ActorConfig {
        &self.config
    }

    pub fn phases(&self) -> &BTreeMap<PhaseNumber, PhaseContext> {
        &self.phases
    }

    pub fn workload(&self) -> &Arc<WorkloadContext> {
        &self.workload
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.workload.orchestrator
    }

    pub fn next_actor_id(&self) -> ActorId {
        self.workload.next_actor_id()
    }

    /// Actor-level key, falling back to the workload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config
            .extra
            .get(key)
            .or_else(|| self.workload.get(key))
    }

    pub fn shared_state<A, S>(&self) -> Arc<S>
    where
        A: 'static,
        S: Default + Send + Sync + 'static,
    {
        self.workload.shared_state::<A, S>()
    }

    /// Metrics handle for one operation of one actor instance.
    pub fn operation(&self, actor_id: ActorId, name: &str) -> Operation {
        Operation::new(self.workload.events.clone(), self.name(), actor_id, name)
    }
}

/// One phase block of one actor.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    number: PhaseNumber,
    location: String,
    node: PhaseNode,
    check: IterationCompletionCheck,
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
    actor: Arc<ActorConfig>,
    workload: Arc<WorkloadConfig>,
}

impl PhaseContext {
    pub fn number(&self) -> PhaseNumber {
        self.number
    }

    /// `<actor>.phase-<n>`, used in error messages.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn node(&self) -> &PhaseNode {
        &self.node
    }

    pub fn check(&self) -> IterationCompletionCheck {
        self.check
    }

    pub fn rate_limiter(&self) -> Option<&Arc<GlobalRateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn skip_first_loop(&self) -> bool {
        self.node.skip_first_loop
    }

    pub fn is_nop(&self) -> bool {
        self.check.is_nop()
    }

    /// Look `key` up in the phase, then the actor, then the workload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.node
            .extra
            .get(key)
            .or_else(|| self.actor.extra.get(key))
            .or_else(|| self.workload.extra.get(key))
    }

    /// [`get`](Self::get) deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    OrchestratorError::config(&self.location, format!("Invalid '{}': {}", key, e))
                })
            })
            .transpose()
    }

    /// Like [`get_as`](Self::get_as), but a missing key is an error.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_as(key)?.ok_or_else(|| {
            OrchestratorError::config(&self.location, format!("Missing required key '{}'", key))
        })
    }
}

/// An actor instance together with the name of the entry that produced it.
pub struct ProducedActor {
    pub name: String,
    pub actor: Box<dyn Actor>,
}

impl std::fmt::Debug for ProducedActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducedActor")
            .field("name", &self.name)
            .field("id", &self.actor.id())
            .finish()
    }
}

/// A fully constructed run, ready for [`WorkloadExecutor`](crate::WorkloadExecutor).
#[derive(Debug)]
pub struct Workload {
    context: Arc<WorkloadContext>,
    actor_contexts: Vec<ActorContext>,
    actors: Vec<ProducedActor>,
}

impl Workload {
    /// Validate `config` and produce every actor it declares.
    ///
    /// Every configuration problem surfaces here, before any thread starts.
    pub fn new(config: WorkloadConfig, cast: &Cast, events: EventBus) -> Result<Self> {
        let context = Arc::new(WorkloadContext::new(config, events)?);

        let actor_contexts = context
            .config()
            .actors
            .iter()
            .cloned()
            .map(|actor| ActorContext::new(Arc::clone(&context), actor))
            .collect::<Result<Vec<_>>>()?;

        validate_bounded_phases(&actor_contexts)?;

        let mut actors = Vec::new();
        for actor_context in &actor_contexts {
            let producer = cast.get(actor_context.actor_type())?;
            for actor in producer.produce(actor_context)? {
                actors.push(ProducedActor {
                    name: actor_context.name().to_string(),
                    actor,
                });
            }
        }

        info!(
            actors = actors.len(),
            phases = context.orchestrator().max_phase() + 1,
            "Workload constructed"
        );

        Ok(Self {
            context,
            actor_contexts,
            actors,
        })
    }

    pub fn context(&self) -> &Arc<WorkloadContext> {
        &self.context
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        self.context.orchestrator()
    }

    pub fn actor_contexts(&self) -> &[ActorContext] {
        &self.actor_contexts
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub(crate) fn into_actors(self) -> (Arc<WorkloadContext>, Vec<ProducedActor>) {
        (self.context, self.actors)
    }
}

/// Every phase in which some actor runs until the phase ends needs another
/// actor that ends it.
fn validate_bounded_phases(actors: &[ActorContext]) -> Result<()> {
    let mut phases: BTreeMap<PhaseNumber, (Vec<&str>, bool)> = BTreeMap::new();
    for actor in actors.iter().filter(|a| a.threads() > 0) {
        for (&number, phase) in actor.phases() {
            let entry = phases.entry(number).or_default();
            match phase.check() {
                IterationCompletionCheck::UntilPhaseEnd => entry.0.push(actor.name()),
                IterationCompletionCheck::Repeat(_) | IterationCompletionCheck::Duration(_) => {
                    entry.1 = true
                }
                IterationCompletionCheck::Nop => {}
            }
        }
    }

    for (number, (unbounded, bounded)) in phases {
        if !unbounded.is_empty() && !bounded {
            return Err(OrchestratorError::config(
                format!("phase-{}", number),
                format!(
                    "Actors [{}] run until the phase ends but no actor bounds phase {} with Repeat or Duration",
                    unbounded.join(", "),
                    number
                ),
            ));
        }
    }
    Ok(())
}
