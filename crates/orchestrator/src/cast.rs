//! Actor trait and the registry of producers by type name.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::context::{ActorContext, ActorId};
use crate::error::{OrchestratorError, Result};

/// Unit of concurrent work. Each instance runs on its own thread.
pub trait Actor: Send + 'static {
    fn id(&self) -> ActorId;

    /// Drive the actor through every phase of the run.
    fn run(&mut self) -> anyhow::Result<()>;
}

/// Builds the actor instances for one `Actors` entry.
pub trait ActorProducer: Send + Sync {
    /// Type name matched against the entry's `Type` key.
    fn name(&self) -> &str;

    fn produce(&self, context: &ActorContext) -> Result<Vec<Box<dyn Actor>>>;
}

/// Producer creating one instance per configured thread, each with a fresh
/// [`ActorId`].
pub struct DefaultActorProducer<A, F> {
    name: String,
    constructor: F,
    _actor: PhantomData<fn() -> A>,
}

impl<A, F> DefaultActorProducer<A, F>
where
    A: Actor,
    F: Fn(&ActorContext, ActorId) -> Result<A> + Send + Sync,
{
    pub fn new(name: impl Into<String>, constructor: F) -> Self {
        Self {
            name: name.into(),
            constructor,
            _actor: PhantomData,
        }
    }
}

impl<A, F> ActorProducer for DefaultActorProducer<A, F>
where
    A: Actor,
    F: Fn(&ActorContext, ActorId) -> Result<A> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, context: &ActorContext) -> Result<Vec<Box<dyn Actor>>> {
        (0..context.threads())
            .map(|_| {
                let id = context.next_actor_id();
                let actor = (self.constructor)(context, id)?;
                Ok(Box::new(actor) as Box<dyn Actor>)
            })
            .collect()
    }
}

/// Registry of actor producers keyed by type name.
#[derive(Default, Clone)]
pub struct Cast {
    producers: BTreeMap<String, Arc<dyn ActorProducer>>,
}

impl Cast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, producer: impl ActorProducer + 'static) -> Result<()> {
        let name = producer.name().to_string();
        if self.producers.contains_key(&name) {
            return Err(OrchestratorError::DuplicateProducer(name));
        }
        debug!(producer = %name, "Actor producer registered");
        self.producers.insert(name, Arc::new(producer));
        Ok(())
    }

    /// Register a [`DefaultActorProducer`] for `name`.
    pub fn register_default<A, F>(&mut self, name: &str, constructor: F) -> Result<()>
    where
        A: Actor,
        F: Fn(&ActorContext, ActorId) -> Result<A> + Send + Sync + 'static,
    {
        self.register(DefaultActorProducer::new(name, constructor))
    }

    pub fn get(&self, name: &str) -> Result<&dyn ActorProducer> {
        self.producers
            .get(name)
            .map(|producer| producer.as_ref())
            .ok_or_else(|| OrchestratorError::UnknownActorType {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.producers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

impl std::fmt::Debug for Cast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cast")
            .field("producers", &self.names())
            .finish()
    }
}
