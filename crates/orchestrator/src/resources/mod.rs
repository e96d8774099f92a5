//! RAII resource guards for automatic cleanup.
//!
//! - [`AbortGuard`] - Aborts the run when an actor thread exits abnormally

mod abort_guard;

pub use abort_guard::AbortGuard;
