//! Report result tree construction and bill synchronization.

mod builder;
mod sync;

pub use builder::*;
pub use sync::*;
