//! Workload file schema.
//!
//! A workload lists actors, each with a thread count and a sequence of phase
//! blocks. Keys the engine understands are typed fields; everything else is
//! kept in `extra` for actor-specific configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::spec::{IntegerSpec, PhaseNumber, RateSpec, TimeSpec};
use crate::error::{CoreError, Result};

/// The only schema version currently understood.
pub const SCHEMA_VERSION: &str = "2018-07-01";

const NOP_NAMES: [&str; 4] = ["Nop", "nop", "NoOp", "noop"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkloadConfig {
    pub schema_version: String,
    pub actors: Vec<ActorConfig>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkloadConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CoreError::Parse(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| CoreError::Parse(e.to_string()))
    }

    pub fn validate_schema(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CoreError::Validation(format!(
                "Invalid schema version '{}', expected '{}'",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

fn default_threads() -> IntegerSpec {
    IntegerSpec::new(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub actor_type: String,
    #[serde(default = "default_threads")]
    pub threads: IntegerSpec,
    #[serde(default)]
    pub phases: Vec<PhaseNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActorConfig {
    /// Configured name, falling back to the actor type.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.actor_type)
    }
}

/// One entry of an actor's `Phases` list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PhaseNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<IntegerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<TimeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<RateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limiter_name: Option<String>,
    #[serde(default)]
    pub skip_first_loop: bool,
    #[serde(
        default,
        alias = "nop",
        alias = "NoOp",
        alias = "noop",
        skip_serializing_if = "Option::is_none"
    )]
    pub nop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PhaseNode {
    /// True when the block is flagged as a nop, either directly or through an
    /// `Operation` whose name is a nop spelling.
    pub fn is_nop(&self) -> bool {
        if self.nop.unwrap_or(false) {
            return true;
        }

        let op_name = match &self.operation {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Object(map)) => map.get("OperationName").and_then(Value::as_str),
            _ => None,
        };
        op_name.is_some_and(|name| NOP_NAMES.contains(&name))
    }
}
