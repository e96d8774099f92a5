use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::Operation;
use tracing::{debug, info};

use crate::cast::Actor;
use crate::context::{ActorContext, ActorId};
use crate::core::PhaseLoop;
use crate::error::Result;

const DEFAULT_MESSAGE: &str = "Hello, World!";

/// Greeting counter shared by every `HelloWorld` instance of a run.
#[derive(Debug, Default)]
pub struct HelloWorldCounter(AtomicU64);

impl HelloWorldCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct HelloWorldPhase {
    message: String,
    operation: Operation,
}

/// Emits its phase's `Message` once per iteration.
pub struct HelloWorld {
    id: ActorId,
    counter: Arc<HelloWorldCounter>,
    phase_loop: PhaseLoop<HelloWorldPhase>,
}

impl HelloWorld {
    pub const NAME: &'static str = "HelloWorld";

    pub fn new(context: &ActorContext, id: ActorId) -> Result<Self> {
        let phase_loop = PhaseLoop::new(context, |phase| {
            Ok(HelloWorldPhase {
                message: phase
                    .get_as::<String>("Message")?
                    .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                operation: context.operation(id, "Write"),
            })
        })?;

        Ok(Self {
            id,
            counter: context.shared_state::<HelloWorld, HelloWorldCounter>(),
            phase_loop,
        })
    }
}

impl Actor for HelloWorld {
    fn id(&self) -> ActorId {
        self.id
    }

    fn run(&mut self) -> anyhow::Result<()> {
        while let Some(mut phase) = self.phase_loop.next_phase()? {
            let number = phase.number();
            for config in phase.iterations() {
                let mut ctx = config.operation.start();
                let count = self.counter.increment();
                debug!(actor_id = self.id, phase = number, count, "{}", config.message);
                ctx.add_documents(1);
                ctx.add_bytes(config.message.len() as u64);
                ctx.success();
            }
        }

        info!(actor_id = self.id, total = self.counter.get(), "HelloWorld finished");
        Ok(())
    }
}
