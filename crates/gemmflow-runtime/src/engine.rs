use crate::{
    BackTrace, EngineId,
    config::GlobalConfig,
    logging::RuntimeLogger,
    memory_management::{MemoryUsage, ScratchAllocator, ScratchBuffer, ScratchPool},
    native::{NativePointer, NativePointerAccessor},
    queue::{DeviceQueue, HostContext, HostQueue, TaskContext},
    server::{Handle, IoError},
    storage::{BytesStorage, MemoryKind},
};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A device and the memory it owns.
pub trait Engine: Clone + Send + Sync + core::fmt::Debug + 'static {
    /// The queues created by the engine.
    type Queue: DeviceQueue;

    /// The id of the engine.
    fn id(&self) -> EngineId;

    /// Creates a new queue submitting to this device.
    fn create_queue(&self) -> Self::Queue;

    /// Allocates device memory initialized with `data`.
    fn create(&self, data: &[u8]) -> Result<Handle, IoError>;

    /// Allocates zeroed device memory.
    fn empty(&self, size: u64) -> Result<Handle, IoError>;

    /// Allocates zeroed memory visible from both the host and the device.
    fn shared(&self, size: u64) -> Result<Handle, IoError>;

    /// Reads memory that is host visible, without going through a queue.
    fn read_host(&self, handle: &Handle) -> Result<Vec<u8>, IoError>;

    /// Reads any memory of the engine. Work pending on queues must be synchronized first.
    fn read(&self, handle: &Handle) -> Result<Vec<u8>, IoError>;

    /// The allocator serving transient scratch buffers.
    fn scratch_allocator(&self) -> &dyn ScratchAllocator;

    /// Makes the device context current for the lifetime of the returned guard.
    fn activate(&self) -> ScopedContext<'_>;

    /// Number of live [scoped contexts](ScopedContext).
    fn active_contexts(&self) -> usize;

    /// The current memory usage of the engine.
    fn memory_usage(&self) -> MemoryUsage;
}

/// Keeps a device context current until dropped.
///
/// Guards nest: the context stays current until the last one is dropped.
#[must_use]
pub struct ScopedContext<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ScopedContext<'a> {
    /// Activates the context tracked by `active`.
    pub fn new(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ScopedContext<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The engine of the host reference backend: memory lives in host buffers and every queue runs
/// on its own worker thread.
#[derive(Clone)]
pub struct HostEngine {
    state: Arc<HostEngineState>,
}

struct HostEngineState {
    id: EngineId,
    storage: Arc<spin::Mutex<BytesStorage>>,
    scratch: ScratchPool,
    active: AtomicUsize,
}

impl Default for HostEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEngine {
    /// Creates an engine configured from the [global config](GlobalConfig).
    pub fn new() -> Self {
        Self::from_config(GlobalConfig::get())
    }

    /// Creates an engine from an explicit configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let id = EngineId::new();
        let storage = Arc::new(spin::Mutex::new(BytesStorage::default()));
        let scratch_config = config.memory.scratch.clone();
        let logger = Arc::new(spin::Mutex::new(RuntimeLogger::from_config(config)));
        let scratch = ScratchPool::new(id, storage.clone(), scratch_config, logger);

        Self {
            state: Arc::new(HostEngineState {
                id,
                storage,
                scratch,
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Releases the cached scratch buffers.
    pub fn memory_cleanup(&self) {
        self.state.scratch.cleanup();
    }

    fn alloc(&self, size: u64, kind: MemoryKind) -> Result<Handle, IoError> {
        let memory = self.state.storage.lock().alloc(size, kind)?;
        Ok(Handle::new(memory, self.state.id))
    }

    fn check_owner(&self, handle: &Handle) -> Result<(), IoError> {
        if handle.engine != self.state.id {
            return Err(IoError::ContextMismatch {
                context: self.state.id,
                handle: handle.engine,
                backtrace: BackTrace::capture(),
            });
        }
        Ok(())
    }
}

impl Engine for HostEngine {
    type Queue = HostQueue;

    fn id(&self) -> EngineId {
        self.state.id
    }

    fn create_queue(&self) -> HostQueue {
        HostQueue::new(self.state.id, self.state.storage.clone())
    }

    fn create(&self, data: &[u8]) -> Result<Handle, IoError> {
        let handle = self.alloc(data.len() as u64, MemoryKind::Device)?;
        self.state
            .storage
            .lock()
            .get_mut(&handle.memory)?
            .copy_from_slice(data);

        Ok(handle)
    }

    fn empty(&self, size: u64) -> Result<Handle, IoError> {
        self.alloc(size, MemoryKind::Device)
    }

    fn shared(&self, size: u64) -> Result<Handle, IoError> {
        self.alloc(size, MemoryKind::Shared)
    }

    fn read_host(&self, handle: &Handle) -> Result<Vec<u8>, IoError> {
        self.check_owner(handle)?;
        let storage = self.state.storage.lock();

        match storage.kind(handle.memory.id) {
            Some(MemoryKind::Shared) => Ok(storage.get(&handle.memory)?.to_vec()),
            Some(MemoryKind::Device) => Err(IoError::NotHostVisible {
                id: handle.memory.id,
                backtrace: BackTrace::capture(),
            }),
            None => Err(IoError::InvalidHandle {
                id: handle.memory.id,
                backtrace: BackTrace::capture(),
            }),
        }
    }

    fn read(&self, handle: &Handle) -> Result<Vec<u8>, IoError> {
        self.check_owner(handle)?;
        Ok(self.state.storage.lock().get(&handle.memory)?.to_vec())
    }

    fn scratch_allocator(&self) -> &dyn ScratchAllocator {
        &self.state.scratch
    }

    fn activate(&self) -> ScopedContext<'_> {
        ScopedContext::new(&self.state.active)
    }

    fn active_contexts(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    fn memory_usage(&self) -> MemoryUsage {
        let (scratch_in_use, scratch_cached) = self.state.scratch.usage();

        MemoryUsage {
            bytes_reserved: self.state.storage.lock().bytes_in_use(),
            scratch_in_use,
            scratch_cached,
        }
    }
}

impl NativePointerAccessor<HostContext> for HostEngine {
    fn native_pointer(
        &self,
        handle: &Handle,
        context: &HostContext,
    ) -> Result<NativePointer, IoError> {
        if context.engine_id() != self.state.id || handle.engine != self.state.id {
            return Err(IoError::ContextMismatch {
                context: context.engine_id(),
                handle: handle.engine,
                backtrace: BackTrace::capture(),
            });
        }

        if !context.storage().contains(handle.memory.id) {
            return Err(IoError::InvalidHandle {
                id: handle.memory.id,
                backtrace: BackTrace::capture(),
            });
        }

        Ok(NativePointer::new(handle.memory.id, handle.memory.offset()))
    }
}

impl ScratchAllocator for HostEngine {
    fn reserve(&self, size: u64) -> Result<ScratchBuffer, IoError> {
        self.state.scratch.reserve(size)
    }
}

impl core::fmt::Debug for HostEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostEngine")
            .field("id", &self.state.id)
            .field("memory", &self.memory_usage())
            .field("active_contexts", &self.active_contexts())
            .finish()
    }
}
