use crate::server::IoError;

use super::ScratchBuffer;

/// Amount of memory in use by an engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes of every live allocation, scratch buffers included.
    pub bytes_reserved: u64,
    /// Bytes of scratch buffers currently handed out.
    pub scratch_in_use: u64,
    /// Bytes of released scratch buffers kept for reuse.
    pub scratch_cached: u64,
}

impl core::fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "reserved: {} B, scratch in use: {} B, scratch cached: {} B",
            self.bytes_reserved, self.scratch_in_use, self.scratch_cached
        )
    }
}

/// Performs the allocation of transient scratch buffers.
///
/// Callers only compute how many bytes they need; the allocator owns the policy.
pub trait ScratchAllocator: Send + Sync {
    /// Reserves a buffer of at least `size` bytes, released when the buffer is dropped.
    fn reserve(&self, size: u64) -> Result<ScratchBuffer, IoError>;
}
