use super::ScratchAllocator;
use crate::{
    BackTrace, EngineId,
    config::memory::ScratchPoolConfig,
    logging::RuntimeLogger,
    server::{Handle, IoError},
    storage::{BytesStorage, MemoryKind, StorageHandle, StorageUtilization},
};
use std::sync::Arc;

/// A pool that hands out transient scratch buffers and keeps released ones for reuse.
///
/// Buffers are served best-fit from the released ones before falling back to a new allocation.
/// Released buffers are cached until `max_cached_bytes` is reached, then deallocated.
#[derive(Clone)]
pub struct ScratchPool {
    state: Arc<spin::Mutex<PoolState>>,
    storage: Arc<spin::Mutex<BytesStorage>>,
    logger: Arc<spin::Mutex<RuntimeLogger>>,
    engine: EngineId,
}

struct PoolState {
    free: Vec<StorageHandle>,
    in_use: u64,
    cached: u64,
    config: ScratchPoolConfig,
}

/// A scratch buffer reserved from a [pool](ScratchPool), returned to it on drop.
pub struct ScratchBuffer {
    handle: Handle,
    capacity: StorageHandle,
    pool: ScratchPool,
}

impl ScratchBuffer {
    /// The handle covering exactly the requested bytes.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The requested size in bytes.
    pub fn size(&self) -> u64 {
        self.handle.size()
    }

    /// The size of the underlying allocation in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity.size()
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        self.pool.release(self.capacity.clone());
    }
}

impl core::fmt::Debug for ScratchBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScratchBuffer")
            .field("handle", &self.handle)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl ScratchPool {
    /// Creates a pool allocating from the given storage.
    pub fn new(
        engine: EngineId,
        storage: Arc<spin::Mutex<BytesStorage>>,
        config: ScratchPoolConfig,
        logger: Arc<spin::Mutex<RuntimeLogger>>,
    ) -> Self {
        Self {
            state: Arc::new(spin::Mutex::new(PoolState {
                free: Vec::new(),
                in_use: 0,
                cached: 0,
                config,
            })),
            storage,
            logger,
            engine,
        }
    }

    /// Bytes handed out and bytes cached for reuse.
    pub fn usage(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.in_use, state.cached)
    }

    /// Deallocates every cached buffer.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let mut storage = self.storage.lock();

        for handle in state.free.drain(..) {
            storage.dealloc(handle.id);
        }
        state.cached = 0;
    }

    fn release(&self, capacity: StorageHandle) {
        let mut state = self.state.lock();
        let size = capacity.size();
        state.in_use -= size;

        if state.cached + size <= state.config.max_cached_bytes {
            state.cached += size;
            state.free.push(capacity);
            self.logger
                .lock()
                .log_memory(format_args!("[scratch] cached {size} B"));
        } else {
            self.storage.lock().dealloc(capacity.id);
            self.logger
                .lock()
                .log_memory(format_args!("[scratch] released {size} B"));
        }
    }
}

impl ScratchAllocator for ScratchPool {
    fn reserve(&self, size: u64) -> Result<ScratchBuffer, IoError> {
        let mut state = self.state.lock();
        let alignment = state.config.alignment.max(1);
        let capacity = size
            .div_ceil(alignment)
            .max(1)
            .checked_mul(alignment)
            .ok_or_else(|| IoError::BufferTooBig {
                size,
                backtrace: BackTrace::capture(),
            })?;

        let reused = state
            .free
            .iter()
            .enumerate()
            .filter(|(_, handle)| handle.size() >= capacity)
            .min_by_key(|(_, handle)| handle.size())
            .map(|(index, _)| index);

        let memory = match reused {
            Some(index) => {
                let memory = state.free.swap_remove(index);
                state.cached -= memory.size();
                self.logger.lock().log_memory(format_args!(
                    "[scratch] reused {} B for {size} B",
                    memory.size()
                ));
                memory
            }
            None => {
                let memory = self.storage.lock().alloc(capacity, MemoryKind::Device)?;
                self.logger
                    .lock()
                    .log_memory(format_args!("[scratch] allocated {capacity} B for {size} B"));
                memory
            }
        };
        state.in_use += memory.size();

        let handle = Handle::new(
            StorageHandle::new(memory.id, StorageUtilization::new(0, size)),
            self.engine,
        );

        Ok(ScratchBuffer {
            handle,
            capacity: memory,
            pool: self.clone(),
        })
    }
}
