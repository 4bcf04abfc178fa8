use crate::{
    EngineId,
    backtrace::BackTrace,
    storage::{StorageHandle, StorageId},
};
use thiserror::Error;

/// Server handle containing the [storage handle](StorageHandle) of a memory region.
///
/// Handles are cheap to clone and only describe memory, they never own it.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    /// Memory region backing the handle.
    pub memory: StorageHandle,
    /// The engine that owns the memory.
    pub engine: EngineId,
}

impl Handle {
    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.memory.size()
    }

    /// Returns a handle to the same memory, starting `offset` bytes further.
    pub fn offset_start(mut self, offset: u64) -> Self {
        self.memory = self.memory.offset_start(offset);
        self
    }
}

/// Error returned from memory transfers and native-pointer lookups.
#[derive(Error, Clone)]
pub enum IoError {
    /// The handle doesn't reference any live allocation.
    #[error("the handle doesn't reference live memory: {id}\n{backtrace}")]
    InvalidHandle {
        /// The storage id that couldn't be found.
        id: StorageId,
        /// The captured backtrace.
        backtrace: BackTrace,
    },

    /// An access goes past the end of its allocation.
    #[error(
        "access out of bounds: offset {offset} with size {size} exceeds the allocation of {len} bytes\n{backtrace}"
    )]
    OutOfBounds {
        /// Offset of the access in bytes.
        offset: u64,
        /// Size of the access in bytes.
        size: u64,
        /// Length of the allocation in bytes.
        len: u64,
        /// The captured backtrace.
        backtrace: BackTrace,
    },

    /// Buffer size exceeds the max available.
    #[error("can't allocate buffer of size: {size}\n{backtrace}")]
    BufferTooBig {
        /// The size of the buffer in bytes.
        size: u64,
        /// The captured backtrace.
        backtrace: BackTrace,
    },

    /// The memory can't be read from the host without a transfer.
    #[error("the memory {id} is not host visible\n{backtrace}")]
    NotHostVisible {
        /// The storage id of the memory.
        id: StorageId,
        /// The captured backtrace.
        backtrace: BackTrace,
    },

    /// The handle belongs to another engine than the executing task.
    #[error("a task of {context} can't access memory owned by {handle}\n{backtrace}")]
    ContextMismatch {
        /// Engine of the running task.
        context: EngineId,
        /// Engine owning the handle.
        handle: EngineId,
        /// The captured backtrace.
        backtrace: BackTrace,
    },
}

impl core::fmt::Debug for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

/// Error that can happen asynchronously while executing queued tasks.
#[derive(Error, Debug, Clone)]
pub enum ServerError {
    /// A generic runtime error.
    #[error("An error happened during execution\nCaused by:\n  {reason}\nBacktrace:\n{backtrace}")]
    Generic {
        /// The details of the generic error.
        reason: String,
        /// The backtrace for this error.
        backtrace: BackTrace,
    },

    /// An io error happened while executing a task.
    #[error("An io error happened during execution\nCaused by:\n  {0}")]
    Io(#[from] IoError),

    /// The queue is in an invalid state.
    #[error("The queue is in an invalid state\nCaused by:\n  {reason}")]
    Unhealthy {
        /// The details of the error.
        reason: String,
        /// The backtrace for this error.
        backtrace: BackTrace,
    },
}

impl ServerError {
    /// Creates a [generic](ServerError::Generic) error with the given reason.
    pub fn generic(reason: impl Into<String>) -> Self {
        Self::Generic {
            reason: reason.into(),
            backtrace: BackTrace::capture(),
        }
    }

    /// Creates an [unhealthy](ServerError::Unhealthy) error with the given reason.
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason: reason.into(),
            backtrace: BackTrace::capture(),
        }
    }
}
