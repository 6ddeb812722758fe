//! Host linear memory, the way a WebAssembly host exposes it.
//!
//! `SharedMemory` is a single contiguous, zeroed, 8-byte aligned block. It is
//! the stand-in for the host allocator: reserve N bytes up front, release them
//! when the block is dropped. Queues built with
//! [`FreeQueue::from_external_layout`](crate::queue::FreeQueue::from_external_layout)
//! only borrow it.
//!
//! Word reads through `&SharedMemory` are atomic loads, so inspecting a layout
//! while the producer and consumer are running is never a data race. Plain
//! word writes need `&mut`, which confines them to setup.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{FreeQueueError, Result};

/// Alignment of the base of every [`SharedMemory`] block.
pub const MEMORY_ALIGN: usize = 8;

/// Size of the header words and lane-table entries in a layout.
pub const WORD_BYTES: usize = 4;

pub struct SharedMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// The block is plain bytes; all concurrent access goes through atomics or the
// index-partitioned lane discipline of the ring.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Reserve `byte_len` zeroed bytes.
    ///
    /// # Errors
    /// `FreeQueueError::Allocation` if `byte_len` is zero, not representable
    /// as an allocation layout, or the allocator refuses the request.
    pub fn new(byte_len: usize) -> Result<Self> {
        if byte_len == 0 {
            return Err(FreeQueueError::Allocation { bytes: 0 });
        }
        let layout = Layout::from_size_align(byte_len, MEMORY_ALIGN)
            .map_err(|_| FreeQueueError::Allocation { bytes: byte_len })?;
        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(FreeQueueError::Allocation { bytes: byte_len })?;
        Ok(Self { ptr, len: byte_len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// `true` if `[offset, offset + bytes)` lies inside the block.
    pub fn contains(&self, offset: usize, bytes: usize) -> bool {
        offset
            .checked_add(bytes)
            .map(|end| end <= self.len)
            .unwrap_or(false)
    }

    /// Atomically load the `u32` word at byte `offset`.
    ///
    /// Returns `None` when the word is misaligned or out of bounds.
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        self.word(offset).map(|w| w.load(Ordering::Acquire))
    }

    /// Store the `u32` word at byte `offset`. Setup only.
    pub fn write_u32(&mut self, offset: usize, value: u32) -> Option<()> {
        self.word(offset).map(|w| w.store(value, Ordering::Release))
    }

    /// Zero `[offset, offset + bytes)`. Setup only.
    pub fn zero(&mut self, offset: usize, bytes: usize) -> Option<()> {
        if !self.contains(offset, bytes) {
            return None;
        }
        // SAFETY: bounds checked above and `&mut self` excludes other access
        // through this block.
        unsafe { std::ptr::write_bytes(self.as_ptr().add(offset), 0, bytes) };
        Some(())
    }

    /// View the word at `offset` as an atomic. Views created by the ring
    /// store use the same cast for the index pair.
    pub(crate) fn word(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % WORD_BYTES != 0 || !self.contains(offset, WORD_BYTES) {
            return None;
        }
        // SAFETY: in bounds, 4-byte aligned (base is 8-aligned), and the
        // memory lives as long as `&self`.
        Some(unsafe { &*(self.as_ptr().add(offset) as *const AtomicU32) })
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same size and alignment.
        unsafe {
            alloc::dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.len, MEMORY_ALIGN),
            )
        };
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("len", &self.len)
            .finish()
    }
}

/// Bump allocator handing out byte offsets inside a [`SharedMemory`].
///
/// Offset 0 is never returned, so a zero offset can be treated as null the
/// way wasm32 pointers are.
pub struct LinearAllocator<'m> {
    memory: &'m mut SharedMemory,
    next: usize,
}

impl<'m> LinearAllocator<'m> {
    pub fn new(memory: &'m mut SharedMemory) -> Self {
        Self {
            memory,
            next: MEMORY_ALIGN,
        }
    }

    /// Reserve `bytes` aligned to `align` (a power of two).
    ///
    /// # Errors
    /// `FreeQueueError::Allocation` when the block is exhausted.
    pub fn alloc(&mut self, bytes: usize, align: usize) -> Result<usize> {
        let start = align_up(self.next, align).ok_or(FreeQueueError::Allocation { bytes })?;
        if !self.memory.contains(start, bytes) {
            return Err(FreeQueueError::Allocation { bytes });
        }
        self.next = start + bytes;
        Ok(start)
    }

    /// Bytes consumed so far, including the reserved null word.
    pub fn used(&self) -> usize {
        self.next
    }

    pub fn remaining(&self) -> usize {
        self.memory.len().saturating_sub(self.next)
    }

    pub fn memory_mut(&mut self) -> &mut SharedMemory {
        self.memory
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}
