//! Built-in actors.

mod hello_world;

pub use hello_world::{HelloWorld, HelloWorldCounter};

use crate::cast::Cast;
use crate::error::Result;

/// A cast with every built-in actor registered.
pub fn default_cast() -> Result<Cast> {
    let mut cast = Cast::new();
    cast.register_default(HelloWorld::NAME, HelloWorld::new)?;
    Ok(cast)
}
