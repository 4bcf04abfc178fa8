#![warn(missing_docs)]

//! Runtime crate for gemmflow: device storage, queues, dependency handles, scratch memory and
//! configuration.

#[macro_use]
extern crate derive_new;

mod backtrace;
mod id;

/// Configuration and logging module.
pub mod config;
/// Dependency handle module.
pub mod dependency;
/// Engine module.
pub mod engine;
/// Logging module.
pub mod logging;
/// Scratch memory management module.
pub mod memory_management;
/// Native pointer module.
pub mod native;
/// Device queue module.
pub mod queue;
/// Runtime module.
pub mod runtime;
/// Error and handle types shared by every backend.
pub mod server;
/// Storage module.
pub mod storage;

pub use backtrace::BackTrace;
pub use id::*;
