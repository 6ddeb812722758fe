//! Ring storage: the index pair plus one sample lane per channel.
//!
//! ## Layout
//!
//! ```text
//! RingIndices   [ read: u32 | write: u32 ]        (atomic words)
//! lane 0        [ f32; capacity + 1 ]
//! lane 1        [ f32; capacity + 1 ]
//! ...
//! lane K-1      [ f32; capacity + 1 ]
//! ```
//!
//! The extra slot per lane keeps `read == write` unambiguous: it always means
//! empty, never full.
//!
//! Two stores implement [`RingStore`]:
//! - [`OwningStore`] allocates its own indices and lanes.
//! - [`ExternalView`] borrows a layout another party wrote into a
//!   [`SharedMemory`](crate::memory::SharedMemory) block.
//!
//! The protocol engine in [`crate::queue`] is written once against the trait.

pub mod external;
pub mod owning;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{FreeQueueError, Result};

pub use external::{layout_byte_len, write_layout, ExternalView, LayoutDescriptor};
pub use owning::OwningStore;

/// Largest ring capacity accepted by any constructor.
///
/// `2^24` frames is ~350 s at 48 kHz; the bound keeps cursor arithmetic well
/// inside `u32` and stops absurd arguments from reserving gigabytes.
pub const MAX_CAPACITY_FRAMES: usize = 1 << 24;

/// Largest channel count accepted by any constructor.
pub const MAX_CHANNEL_COUNT: usize = 32;

/// Read and write cursors, laid out as two consecutive `u32` words.
///
/// Loads are `Acquire` and stores are `Release`: a cursor store publishes
/// every lane write made before it, and a cursor load makes those writes
/// visible to the side that observes it.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RingIndices {
    read: AtomicU32,
    write: AtomicU32,
}

impl RingIndices {
    /// Byte size of the pair in an external layout.
    pub const BYTES: usize = 8;

    pub const fn new() -> Self {
        Self {
            read: AtomicU32::new(0),
            write: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn load_read(&self) -> usize {
        self.read.load(Ordering::Acquire) as usize
    }

    #[inline]
    pub fn load_write(&self) -> usize {
        self.write.load(Ordering::Acquire) as usize
    }

    /// Snapshot as `(read, write)`.
    #[inline]
    pub fn load(&self) -> (usize, usize) {
        (self.load_read(), self.load_write())
    }

    // Cursor values never exceed MAX_CAPACITY_FRAMES, so the casts are lossless.
    #[inline]
    pub(crate) fn store_read(&self, read: usize) {
        self.read.store(read as u32, Ordering::Release);
    }

    #[inline]
    pub(crate) fn store_write(&self, write: usize) {
        self.write.store(write as u32, Ordering::Release);
    }
}

/// Storage backing a [`FreeQueue`](crate::queue::FreeQueue).
///
/// # Safety
///
/// Implementors guarantee that for every `channel < channel_count()`,
/// `lane_ptr(channel)` points to `capacity() + 1` writable `f32` slots that
/// stay valid for the lifetime of `self`, that no two lanes overlap, and that
/// `indices()` is the one index pair every handle to this storage observes.
pub unsafe trait RingStore: Send + Sync {
    /// Logical slot count (frames the ring can hold when full).
    fn capacity(&self) -> usize;

    fn channel_count(&self) -> usize;

    fn indices(&self) -> &RingIndices;

    /// Base pointer of the lane for `channel`.
    fn lane_ptr(&self, channel: usize) -> *mut f32;

    /// Physical lane length, one guard slot past capacity.
    #[inline]
    fn lane_len(&self) -> usize {
        self.capacity() + 1
    }

    /// Copy `dst.len()` samples out of `channel` starting at slot `offset`.
    ///
    /// # Safety
    /// `channel < channel_count()`, `offset + dst.len() <= lane_len()`, and
    /// the slot range must be owned by the caller under the index discipline
    /// (no concurrent writer touches it).
    #[inline]
    unsafe fn read_lane(&self, channel: usize, offset: usize, dst: &mut [f32]) {
        debug_assert!(channel < self.channel_count());
        debug_assert!(offset + dst.len() <= self.lane_len());
        std::ptr::copy_nonoverlapping(
            self.lane_ptr(channel).add(offset),
            dst.as_mut_ptr(),
            dst.len(),
        );
    }

    /// Copy `src` into `channel` starting at slot `offset`.
    ///
    /// # Safety
    /// Same bounds as [`read_lane`](Self::read_lane); the slot range must not
    /// be visible to the reader until the write cursor is published.
    #[inline]
    unsafe fn write_lane(&self, channel: usize, offset: usize, src: &[f32]) {
        debug_assert!(channel < self.channel_count());
        debug_assert!(offset + src.len() <= self.lane_len());
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.lane_ptr(channel).add(offset), src.len());
    }

    /// Zero every lane.
    ///
    /// # Safety
    /// No push or pull may run concurrently.
    unsafe fn clear_lanes(&self) {
        let len = self.lane_len();
        for channel in 0..self.channel_count() {
            std::ptr::write_bytes(self.lane_ptr(channel), 0, len);
        }
    }
}

/// Check a `(capacity, channel_count)` pair against the supported ranges.
pub(crate) fn validate_geometry(capacity: usize, channel_count: usize) -> Result<()> {
    if capacity == 0 {
        return Err(FreeQueueError::Constructor(
            "capacity must be non-zero".into(),
        ));
    }
    if capacity > MAX_CAPACITY_FRAMES {
        return Err(FreeQueueError::Constructor(format!(
            "capacity must be <= {MAX_CAPACITY_FRAMES}"
        )));
    }
    if channel_count == 0 {
        return Err(FreeQueueError::Constructor(
            "channel count must be non-zero".into(),
        ));
    }
    if channel_count > MAX_CHANNEL_COUNT {
        return Err(FreeQueueError::Constructor(format!(
            "channel count must be <= {MAX_CHANNEL_COUNT}"
        )));
    }
    Ok(())
}
