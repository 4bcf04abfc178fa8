mod base;
mod host;

pub use base::*;
pub use host::*;
