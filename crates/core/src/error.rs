use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid time spec '{input}': {reason}")]
    InvalidTimeSpec { input: String, reason: String },

    #[error("Invalid integer spec '{input}': {reason}")]
    InvalidIntegerSpec { input: String, reason: String },

    #[error("Invalid rate spec '{input}': {reason}")]
    InvalidRateSpec { input: String, reason: String },

    #[error("Failed to parse workload: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CoreError {
    pub fn time_spec(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTimeSpec {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn integer_spec(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIntegerSpec {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn rate_spec(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRateSpec {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
