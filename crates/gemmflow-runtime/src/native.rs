use crate::{
    queue::TaskContext,
    server::{Handle, IoError},
    storage::StorageId,
};

/// Raw device address backing a [handle](Handle), only valid inside the task that resolved it.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePointer {
    /// Allocation the address points into.
    pub storage: StorageId,
    /// Byte offset inside the allocation.
    pub offset: u64,
}

/// Capability of a backend to expose the native pointer of a memory handle.
///
/// This replaces downcasting a generic queue or engine to its concrete backend type: each backend
/// implements the accessor for its own [task context](TaskContext), so the lookup can only happen
/// while a task is executing on the queue.
pub trait NativePointerAccessor<C: TaskContext> {
    /// Returns the raw device address backing `handle` for the task running with `context`.
    fn native_pointer(&self, handle: &Handle, context: &C) -> Result<NativePointer, IoError>;
}
