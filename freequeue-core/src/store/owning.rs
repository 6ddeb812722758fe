//! Store that owns its indices and lanes.

use std::cell::UnsafeCell;

use tracing::debug;

use super::{validate_geometry, RingIndices, RingStore};
use crate::error::{FreeQueueError, Result};

type Lane = Box<[UnsafeCell<f32>]>;

/// Freshly allocated, zeroed ring storage.
pub struct OwningStore {
    capacity: usize,
    indices: RingIndices,
    lanes: Box<[Lane]>,
}

// Lane slots are only touched through the index-partitioned discipline of the
// protocol engine; the cursors themselves are atomics.
unsafe impl Send for OwningStore {}
unsafe impl Sync for OwningStore {}

impl OwningStore {
    /// Allocate `channel_count` lanes of `capacity + 1` zeroed samples and an
    /// index pair at `(0, 0)`.
    ///
    /// # Errors
    /// - `FreeQueueError::Constructor` for a zero or oversized geometry.
    /// - `FreeQueueError::Allocation` if the lanes cannot be reserved.
    pub fn create(capacity: usize, channel_count: usize) -> Result<Self> {
        validate_geometry(capacity, channel_count)?;

        let lane_len = capacity + 1;
        let mut lanes = Vec::new();
        lanes
            .try_reserve_exact(channel_count)
            .map_err(|_| FreeQueueError::Allocation {
                bytes: channel_count * std::mem::size_of::<Lane>(),
            })?;
        for _ in 0..channel_count {
            lanes.push(alloc_lane(lane_len)?);
        }

        debug!(capacity, channel_count, "owning ring store allocated");

        Ok(Self {
            capacity,
            indices: RingIndices::new(),
            lanes: lanes.into_boxed_slice(),
        })
    }
}

fn alloc_lane(len: usize) -> Result<Lane> {
    let mut lane: Vec<UnsafeCell<f32>> = Vec::new();
    lane.try_reserve_exact(len)
        .map_err(|_| FreeQueueError::Allocation {
            bytes: len * std::mem::size_of::<f32>(),
        })?;
    lane.resize_with(len, || UnsafeCell::new(0.0));
    Ok(lane.into_boxed_slice())
}

unsafe impl RingStore for OwningStore {
    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn channel_count(&self) -> usize {
        self.lanes.len()
    }

    #[inline]
    fn indices(&self) -> &RingIndices {
        &self.indices
    }

    #[inline]
    fn lane_ptr(&self, channel: usize) -> *mut f32 {
        // `UnsafeCell<f32>` is `repr(transparent)`.
        UnsafeCell::raw_get(self.lanes[channel].as_ptr())
    }
}

impl std::fmt::Debug for OwningStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwningStore")
            .field("capacity", &self.capacity)
            .field("channel_count", &self.lanes.len())
            .field("indices", &self.indices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_have_guard_slot_and_are_zeroed() {
        let store = OwningStore::create(10, 3).unwrap();
        assert_eq!(store.capacity(), 10);
        assert_eq!(store.channel_count(), 3);
        assert_eq!(store.lane_len(), 11);
        for ch in 0..3 {
            let mut out = [1.0f32; 11];
            unsafe { store.read_lane(ch, 0, &mut out) };
            assert_eq!(out, [0.0; 11]);
        }
        assert_eq!(store.indices().load(), (0, 0));
    }

    #[test]
    fn lanes_are_independent() {
        let store = OwningStore::create(4, 2).unwrap();
        unsafe {
            store.write_lane(0, 1, &[1.0, 2.0]);
            store.write_lane(1, 3, &[9.0, 8.0]);
        }
        let mut a = [0.0f32; 5];
        let mut b = [0.0f32; 5];
        unsafe {
            store.read_lane(0, 0, &mut a);
            store.read_lane(1, 0, &mut b);
        }
        assert_eq!(a, [0.0, 1.0, 2.0, 0.0, 0.0]);
        assert_eq!(b, [0.0, 0.0, 0.0, 9.0, 8.0]);

        unsafe { store.clear_lanes() };
        unsafe { store.read_lane(1, 0, &mut b) };
        assert_eq!(b, [0.0; 5]);
    }

    #[test]
    fn rejects_zero_geometry() {
        assert!(matches!(
            OwningStore::create(0, 2),
            Err(FreeQueueError::Constructor(_))
        ));
        assert!(matches!(
            OwningStore::create(16, 0),
            Err(FreeQueueError::Constructor(_))
        ));
    }
}
