pub mod spec;
pub mod workload;

pub use spec::{IntegerSpec, PhaseNumber, RateSpec, RawSpec, TimeSpec};
pub use workload::{ActorConfig, PhaseNode, WorkloadConfig, SCHEMA_VERSION};
