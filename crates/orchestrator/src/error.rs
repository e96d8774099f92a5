use lockstep_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid configuration at {location}: {reason}")]
    InvalidConfiguration { location: String, reason: String },

    #[error("Run aborted")]
    Aborted,

    #[error("Actor {actor} failed: {reason}")]
    ActorFailed { actor: String, reason: String },

    #[error("Actor {actor} panicked")]
    ActorPanicked { actor: String },

    #[error("Unknown actor type '{name}' (known: {known})")]
    UnknownActorType { name: String, known: String },

    #[error("Actor producer already registered: {0}")]
    DuplicateProducer(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Create an invalid configuration error.
    pub fn config(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Create an actor failure from any displayable error.
    pub fn actor_failed(actor: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ActorFailed {
            actor: actor.into(),
            reason: reason.to_string(),
        }
    }

    /// Re-home a configuration error at a more specific location.
    ///
    /// Other variants are returned unchanged.
    pub fn at(self, location: impl Into<String>) -> Self {
        match self {
            Self::InvalidConfiguration { reason, .. } => Self::InvalidConfiguration {
                location: location.into(),
                reason,
            },
            Self::Core(err) => Self::InvalidConfiguration {
                location: location.into(),
                reason: err.to_string(),
            },
            other => other,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::UnknownActorType { .. }
                | Self::DuplicateProducer(_)
                | Self::Core(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
