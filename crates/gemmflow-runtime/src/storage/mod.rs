mod base;
mod bytes;

pub use base::*;
pub use bytes::*;
