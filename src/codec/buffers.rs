// SPDX-License-Identifier: GPL-3.0-only

//! Local mirror of the device's input and output slot arrays
//!
//! Slot memory belongs to the device. The decoder only keeps the arrays
//! returned by `input_buffers`/`output_buffers`, swapped wholesale on every
//! buffers-changed event. A [`SlotRef`] remembers which generation of the
//! array it was acquired from, so a stale index is rejected instead of
//! touching memory the device already reclaimed.

use crate::errors::{DecoderError, DecoderResult};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Memory behind one device slot
pub trait SlotMemory: Send + Sync {
    fn capacity(&self) -> usize;

    /// Copy `data` into the slot at `offset`, returns bytes written
    fn write(&self, offset: usize, data: &[u8]) -> usize;

    /// Run `f` over the slot contents
    fn read(&self, f: &mut dyn FnMut(&[u8]));
}

/// Slot memory allocated on the heap
pub struct HeapBuffer {
    data: Mutex<Box<[u8]>>,
}

impl HeapBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }
}

impl SlotMemory for HeapBuffer {
    fn capacity(&self) -> usize {
        self.data.lock().map(|d| d.len()).unwrap_or(0)
    }

    fn write(&self, offset: usize, data: &[u8]) -> usize {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if offset >= guard.len() {
            return 0;
        }
        let n = data.len().min(guard.len() - offset);
        guard[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    fn read(&self, f: &mut dyn FnMut(&[u8])) {
        let guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard);
    }
}

/// Shared handle to one device slot
#[derive(Clone)]
pub struct DeviceBuffer {
    memory: Arc<dyn SlotMemory>,
}

impl DeviceBuffer {
    pub fn new(memory: Arc<dyn SlotMemory>) -> Self {
        Self { memory }
    }

    /// Heap-backed slot of the given capacity
    pub fn heap(capacity: usize) -> Self {
        Self::new(Arc::new(HeapBuffer::new(capacity)))
    }

    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        self.memory.write(offset, data)
    }

    /// Borrow the slot contents for the duration of `f`
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let mut f = Some(f);
        let mut result = None;
        self.memory.read(&mut |bytes| {
            if let Some(f) = f.take() {
                result = Some(f(bytes));
            }
        });
        match result {
            Some(r) => r,
            // SlotMemory::read always invokes the callback
            None => unreachable!("slot memory did not provide its contents"),
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Index into a specific generation of a [`BufferArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub index: usize,
    pub generation: u64,
}

/// One direction's slot array
#[derive(Debug, Clone)]
pub struct BufferArena {
    buffers: Arc<[DeviceBuffer]>,
    generation: u64,
}

impl Default for BufferArena {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferArena {
    pub fn new() -> Self {
        Self {
            buffers: Arc::from(Vec::new()),
            generation: 0,
        }
    }

    /// Swap in a freshly fetched array, invalidating every outstanding SlotRef
    pub fn replace(&mut self, buffers: Vec<DeviceBuffer>) {
        self.buffers = Arc::from(buffers);
        self.generation += 1;
    }

    /// Drop the array, e.g. when the device stops
    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Validate an index the device just handed out
    pub fn acquire(&self, index: usize) -> DecoderResult<SlotRef> {
        if index >= self.buffers.len() {
            return Err(DecoderError::InvalidBufferIndex {
                index,
                len: self.buffers.len(),
            });
        }
        Ok(SlotRef {
            index,
            generation: self.generation,
        })
    }

    /// Resolve a slot, rejecting refs from an older array
    pub fn get(&self, slot: SlotRef) -> DecoderResult<&DeviceBuffer> {
        if slot.generation != self.generation {
            return Err(DecoderError::InvalidBufferIndex {
                index: slot.index,
                len: self.buffers.len(),
            });
        }
        self.buffers
            .get(slot.index)
            .ok_or(DecoderError::InvalidBufferIndex {
                index: slot.index,
                len: self.buffers.len(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(count: usize, capacity: usize) -> BufferArena {
        let mut arena = BufferArena::new();
        arena.replace((0..count).map(|_| DeviceBuffer::heap(capacity)).collect());
        arena
    }

    #[test]
    fn test_acquire_bounds_checked() {
        let arena = arena(4, 16);
        assert!(arena.acquire(3).is_ok());
        assert_eq!(
            arena.acquire(4),
            Err(DecoderError::InvalidBufferIndex { index: 4, len: 4 })
        );
    }

    #[test]
    fn test_replace_invalidates_old_refs() {
        let mut arena = arena(4, 16);
        let slot = arena.acquire(2).unwrap();
        assert!(arena.get(slot).is_ok());

        arena.replace((0..8).map(|_| DeviceBuffer::heap(16)).collect());
        assert!(matches!(
            arena.get(slot),
            Err(DecoderError::InvalidBufferIndex { index: 2, .. })
        ));

        let fresh = arena.acquire(2).unwrap();
        assert!(arena.get(fresh).is_ok());
    }

    #[test]
    fn test_clear_rejects_everything() {
        let mut arena = arena(2, 16);
        arena.clear();
        assert!(arena.is_empty());
        assert!(arena.acquire(0).is_err());
    }

    #[test]
    fn test_heap_write_truncates() {
        let buffer = DeviceBuffer::heap(4);
        assert_eq!(buffer.write(2, &[1, 2, 3]), 2);
        assert_eq!(buffer.write(8, &[1]), 0);
        buffer.with_bytes(|bytes| assert_eq!(bytes, &[0, 0, 1, 2]));
    }
}
