use crate::{
    EngineId, QueueId,
    dependency::Dependency,
    native::NativePointer,
    server::{IoError, ServerError},
};

/// Execution context handed to a task while it runs on a queue.
///
/// The context is the only way to reach device memory from inside a task, which makes native
/// pointers impossible to obtain outside of one.
pub trait TaskContext: Send {
    /// The engine whose memory the task can access.
    fn engine_id(&self) -> EngineId;

    /// The queue executing the task.
    fn queue_id(&self) -> QueueId;

    /// Copies `size` bytes from `src` to `dst`, in queue order.
    fn copy(&mut self, src: NativePointer, dst: NativePointer, size: u64) -> Result<(), IoError>;
}

/// A host callback enqueued on a device queue.
pub type HostTask<C> = Box<dyn FnOnce(&mut C) -> Result<(), ServerError> + Send>;

/// Compute work dispatched on a device queue.
pub trait ComputeTask<C: TaskContext>: Send {
    /// Name of the task, used for logging.
    fn name(&self) -> &str;

    /// Runs the computation.
    fn compute(self: Box<Self>, context: &mut C) -> Result<(), ServerError>;
}

/// An ordered submission channel for asynchronous work on an accelerator.
///
/// Every submission returns a [dependency](Dependency) that resolves once the work ran. Work is
/// executed in submission order.
pub trait DeviceQueue: Send + Sync + core::fmt::Debug {
    /// The context tasks run with.
    type Context: TaskContext;

    /// The id of the queue.
    fn id(&self) -> QueueId;

    /// Enqueues a host callback.
    fn host_task(&self, task: HostTask<Self::Context>) -> Dependency;

    /// Enqueues compute work.
    fn dispatch(&self, task: Box<dyn ComputeTask<Self::Context>>) -> Dependency;

    /// Blocks until every task submitted so far completed.
    fn sync(&self) -> Result<(), ServerError>;

    /// The dependencies of the tasks submitted to this queue that are still pending.
    fn dependencies(&self) -> Vec<Dependency>;
}
