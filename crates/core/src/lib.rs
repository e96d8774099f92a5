//! Shared value types for lockstep workloads.
//!
//! - [`TimeSpec`], [`IntegerSpec`], [`RateSpec`]: validated numeric values
//! - [`WorkloadConfig`] and friends: the workload file schema
//! - [`CoreError`]: parse and validation failures

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
