//! Execution control path of a matrix multiplication primitive.
//!
//! A [primitive](MatmulPrimitive) resolves its parameters when they are only known at execution,
//! fetches a runtime output scale from device memory, sizes its scratchpad and hands everything
//! to an [executor](executor::MatmulExecutor). When the parameters were resolved for the call, it
//! waits for the enqueued work before discarding them.

#[macro_use]
extern crate derive_new;

/// Call context, states and dependency tracking.
pub mod call;
/// Descriptors, parameters, arguments and errors.
pub mod components;
/// Dispatch of the numeric work.
pub mod executor;
pub mod resolver;
/// Fetching of a runtime output scale.
pub mod scale;
pub mod scratchpad;

mod primitive;

pub use primitive::*;
