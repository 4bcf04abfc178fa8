mod base;
mod naive;

pub use base::*;
pub use naive::*;
