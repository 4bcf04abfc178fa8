/// Execution config module.
pub mod execution;
/// Memory config module.
pub mod memory;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
