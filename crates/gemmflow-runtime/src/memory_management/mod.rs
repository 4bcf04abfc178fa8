mod base;
mod scratch_pool;

pub use base::*;
pub use scratch_pool::*;
