use super::{MemoryKind, StorageHandle, StorageId, StorageUtilization};
use crate::{BackTrace, native::NativePointer, server::IoError};
use hashbrown::HashMap;

/// Largest single allocation the byte storage accepts.
pub const MAX_ALLOCATION_SIZE: u64 = 1 << 36;

/// The bytes storage maps ids to host buffers, standing in for device memory.
#[derive(Default)]
pub struct BytesStorage {
    memory: HashMap<StorageId, Allocation>,
}

struct Allocation {
    bytes: Vec<u8>,
    kind: MemoryKind,
}

impl core::fmt::Debug for BytesStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BytesStorage")
            .field("allocations", &self.memory.len())
            .field("bytes", &self.bytes_in_use())
            .finish()
    }
}

impl BytesStorage {
    /// Allocates `size` zeroed bytes.
    pub fn alloc(&mut self, size: u64, kind: MemoryKind) -> Result<StorageHandle, IoError> {
        if size > MAX_ALLOCATION_SIZE {
            return Err(IoError::BufferTooBig {
                size,
                backtrace: BackTrace::capture(),
            });
        }

        let id = StorageId::new();
        self.memory.insert(
            id,
            Allocation {
                bytes: vec![0; size as usize],
                kind,
            },
        );

        Ok(StorageHandle::new(id, StorageUtilization::new(0, size)))
    }

    /// Releases an allocation, returns false when it was already gone.
    pub fn dealloc(&mut self, id: StorageId) -> bool {
        self.memory.remove(&id).is_some()
    }

    /// Whether the id references a live allocation.
    pub fn contains(&self, id: StorageId) -> bool {
        self.memory.contains_key(&id)
    }

    /// The kind of memory backing the allocation.
    pub fn kind(&self, id: StorageId) -> Option<MemoryKind> {
        self.memory.get(&id).map(|allocation| allocation.kind)
    }

    /// Total number of bytes currently allocated.
    pub fn bytes_in_use(&self) -> u64 {
        self.memory
            .values()
            .map(|allocation| allocation.bytes.len() as u64)
            .sum()
    }

    /// Returns the bytes the handle points to.
    pub fn get(&self, handle: &StorageHandle) -> Result<&[u8], IoError> {
        let bytes = self.allocation(handle.id)?;
        let range = checked_range(handle.offset(), handle.size(), bytes.len())?;

        Ok(&bytes[range])
    }

    /// Returns the bytes the handle points to, mutably.
    pub fn get_mut(&mut self, handle: &StorageHandle) -> Result<&mut [u8], IoError> {
        let bytes = self.allocation_mut(handle.id)?;
        let range = checked_range(handle.offset(), handle.size(), bytes.len())?;

        Ok(&mut bytes[range])
    }

    /// Copies `size` bytes between two native pointers.
    pub fn copy(
        &mut self,
        src: NativePointer,
        dst: NativePointer,
        size: u64,
    ) -> Result<(), IoError> {
        let src_bytes = self.allocation(src.storage)?;
        let src_range = checked_range(src.offset, size, src_bytes.len())?;

        if src.storage == dst.storage {
            let dst_bytes = self.allocation_mut(dst.storage)?;
            checked_range(dst.offset, size, dst_bytes.len())?;
            dst_bytes.copy_within(src_range, dst.offset as usize);
            return Ok(());
        }

        let staging = src_bytes[src_range].to_vec();
        let dst_bytes = self.allocation_mut(dst.storage)?;
        let dst_range = checked_range(dst.offset, size, dst_bytes.len())?;
        dst_bytes[dst_range].copy_from_slice(&staging);

        Ok(())
    }

    fn allocation(&self, id: StorageId) -> Result<&Vec<u8>, IoError> {
        self.memory
            .get(&id)
            .map(|allocation| &allocation.bytes)
            .ok_or_else(|| IoError::InvalidHandle {
                id,
                backtrace: BackTrace::capture(),
            })
    }

    fn allocation_mut(&mut self, id: StorageId) -> Result<&mut Vec<u8>, IoError> {
        self.memory
            .get_mut(&id)
            .map(|allocation| &mut allocation.bytes)
            .ok_or_else(|| IoError::InvalidHandle {
                id,
                backtrace: BackTrace::capture(),
            })
    }
}

fn checked_range(offset: u64, size: u64, len: usize) -> Result<core::ops::Range<usize>, IoError> {
    match offset.checked_add(size) {
        Some(end) if end <= len as u64 => Ok(offset as usize..end as usize),
        _ => Err(IoError::OutOfBounds {
            offset,
            size,
            len: len as u64,
            backtrace: BackTrace::capture(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_zeroed_memory() {
        let mut storage = BytesStorage::default();
        let handle = storage.alloc(8, MemoryKind::Device).unwrap();

        assert_eq!(storage.get(&handle).unwrap(), &[0; 8]);
        assert_eq!(storage.bytes_in_use(), 8);
        assert_eq!(storage.kind(handle.id), Some(MemoryKind::Device));
    }

    #[test]
    fn copy_between_allocations() {
        let mut storage = BytesStorage::default();
        let src = storage.alloc(4, MemoryKind::Device).unwrap();
        let dst = storage.alloc(8, MemoryKind::Shared).unwrap();
        storage.get_mut(&src).unwrap().copy_from_slice(&[1, 2, 3, 4]);

        storage
            .copy(
                NativePointer::new(src.id, 0),
                NativePointer::new(dst.id, 4),
                4,
            )
            .unwrap();

        assert_eq!(storage.get(&dst).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_within_one_allocation() {
        let mut storage = BytesStorage::default();
        let handle = storage.alloc(4, MemoryKind::Device).unwrap();
        storage.get_mut(&handle).unwrap().copy_from_slice(&[1, 2, 0, 0]);

        storage
            .copy(
                NativePointer::new(handle.id, 0),
                NativePointer::new(handle.id, 2),
                2,
            )
            .unwrap();

        assert_eq!(storage.get(&handle).unwrap(), &[1, 2, 1, 2]);
    }

    #[test]
    fn copy_out_of_bounds_fails() {
        let mut storage = BytesStorage::default();
        let src = storage.alloc(2, MemoryKind::Device).unwrap();
        let dst = storage.alloc(4, MemoryKind::Shared).unwrap();

        let result = storage.copy(
            NativePointer::new(src.id, 0),
            NativePointer::new(dst.id, 0),
            4,
        );

        assert!(matches!(result, Err(IoError::OutOfBounds { len: 2, .. })));
    }

    #[test]
    fn dealloc_invalidates_handles() {
        let mut storage = BytesStorage::default();
        let handle = storage.alloc(4, MemoryKind::Device).unwrap();

        assert!(storage.dealloc(handle.id));
        assert!(!storage.dealloc(handle.id));
        assert!(matches!(
            storage.get(&handle),
            Err(IoError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn huge_allocations_are_rejected() {
        let mut storage = BytesStorage::default();

        let result = storage.alloc(MAX_ALLOCATION_SIZE + 1, MemoryKind::Device);

        assert!(matches!(result, Err(IoError::BufferTooBig { .. })));
    }
}
