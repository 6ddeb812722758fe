//! Non-owning view over a ring layout that lives in [`SharedMemory`].
//!
//! A host module (e.g. a wasm instance) writes the layout once and hands the
//! other context a [`LayoutDescriptor`] of byte offsets. Both contexts then
//! build their own [`ExternalView`] over the same memory.
//!
//! Layout words (all little-endian `u32`, 4-byte aligned):
//! - `buffer_length_offset`: physical lane length (`capacity + 1`)
//! - `channel_count_offset`: number of lanes
//! - `index_pair_offset`: `[read, write]` cursors, accessed atomically
//! - `channel_lane_table_offset`: one lane byte offset per channel

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{validate_geometry, RingIndices, RingStore, MAX_CAPACITY_FRAMES, MAX_CHANNEL_COUNT};
use crate::error::{FreeQueueError, Result};
use crate::memory::{LinearAllocator, SharedMemory, MEMORY_ALIGN, WORD_BYTES};

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Byte offsets locating a ring layout inside one [`SharedMemory`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutDescriptor {
    pub buffer_length_offset: usize,
    pub channel_count_offset: usize,
    pub index_pair_offset: usize,
    pub channel_lane_table_offset: usize,
}

/// Borrowed ring storage described by a [`LayoutDescriptor`].
pub struct ExternalView<'a> {
    capacity: usize,
    indices: *const RingIndices,
    lanes: Box<[*mut f32]>,
    _memory: PhantomData<&'a SharedMemory>,
}

// Pointers all target the borrowed `SharedMemory`, which is itself Send + Sync.
unsafe impl Send for ExternalView<'_> {}
unsafe impl Sync for ExternalView<'_> {}

impl<'a> ExternalView<'a> {
    /// Validate `desc` against `memory` and build a view.
    ///
    /// # Errors
    /// `FreeQueueError::InvalidLayout` when a word is misaligned or outside
    /// the block, header words overlap each other, the channel count is zero
    /// or too large, the lane length cannot hold a frame, a cursor lies
    /// outside `[0, capacity]`, or lanes overlap each other or the header
    /// words.
    ///
    /// # Safety
    /// Every view of the same layout shares one pair of cursors. Across all
    /// of them, at most one context may push and at most one may pull at any
    /// time, and a reset must not overlap any push or pull.
    ///
    /// Attaching therefore always goes through `unsafe`:
    ///
    /// ```compile_fail
    /// use freequeue_core::{ExternalView, LayoutDescriptor, SharedMemory};
    ///
    /// fn attach(memory: &SharedMemory, desc: LayoutDescriptor) {
    ///     let _view = ExternalView::from_layout(memory, desc);
    /// }
    /// ```
    pub unsafe fn from_layout(memory: &'a SharedMemory, desc: LayoutDescriptor) -> Result<Self> {
        let lane_len = memory
            .read_u32(desc.buffer_length_offset)
            .ok_or_else(|| invalid("buffer length word is misaligned or out of bounds"))?
            as usize;
        if lane_len < 2 {
            return Err(invalid(format!(
                "lane length {lane_len} cannot hold a frame"
            )));
        }
        let capacity = lane_len - 1;
        if capacity > MAX_CAPACITY_FRAMES {
            return Err(invalid(format!(
                "capacity {capacity} exceeds {MAX_CAPACITY_FRAMES}"
            )));
        }

        let channel_count = memory
            .read_u32(desc.channel_count_offset)
            .ok_or_else(|| invalid("channel count word is misaligned or out of bounds"))?
            as usize;
        if channel_count == 0 {
            return Err(invalid("channel count is zero"));
        }
        if channel_count > MAX_CHANNEL_COUNT {
            return Err(invalid(format!(
                "channel count {channel_count} exceeds {MAX_CHANNEL_COUNT}"
            )));
        }

        if desc.index_pair_offset % WORD_BYTES != 0
            || !memory.contains(desc.index_pair_offset, RingIndices::BYTES)
        {
            return Err(invalid("index pair is misaligned or out of bounds"));
        }

        let table_bytes = channel_count * WORD_BYTES;
        if desc.channel_lane_table_offset % WORD_BYTES != 0
            || !memory.contains(desc.channel_lane_table_offset, table_bytes)
        {
            return Err(invalid("lane table is misaligned or out of bounds"));
        }

        // Header regions: pairwise disjoint, and no lane may cover one.
        let header = [
            ("buffer length word", desc.buffer_length_offset, WORD_BYTES),
            ("channel count word", desc.channel_count_offset, WORD_BYTES),
            ("index pair", desc.index_pair_offset, RingIndices::BYTES),
            ("lane table", desc.channel_lane_table_offset, table_bytes),
        ];
        for (i, &(name, start, len)) in header.iter().enumerate() {
            for &(other, o_start, o_len) in &header[..i] {
                if overlaps(start, len, o_start, o_len) {
                    return Err(invalid(format!("{name} overlaps {other}")));
                }
            }
        }
        let mut regions: Vec<(usize, usize)> =
            header.iter().map(|&(_, start, len)| (start, len)).collect();

        let read = memory
            .read_u32(desc.index_pair_offset)
            .ok_or_else(|| invalid("read cursor unreadable"))? as usize;
        let write = memory
            .read_u32(desc.index_pair_offset + WORD_BYTES)
            .ok_or_else(|| invalid("write cursor unreadable"))? as usize;
        if read > capacity || write > capacity {
            return Err(invalid(format!(
                "cursors (read={read}, write={write}) exceed capacity {capacity}"
            )));
        }

        let lane_bytes = lane_len * SAMPLE_BYTES;
        let mut lane_offsets = Vec::with_capacity(channel_count);
        for channel in 0..channel_count {
            let entry = desc.channel_lane_table_offset + channel * WORD_BYTES;
            let offset = memory
                .read_u32(entry)
                .ok_or_else(|| invalid(format!("lane table entry {channel} unreadable")))?
                as usize;
            if offset % SAMPLE_BYTES != 0 || !memory.contains(offset, lane_bytes) {
                return Err(invalid(format!(
                    "lane {channel} at {offset} (+{lane_bytes} bytes) is misaligned or out of bounds"
                )));
            }
            if let Some(&(start, len)) = regions
                .iter()
                .find(|&&(start, len)| overlaps(offset, lane_bytes, start, len))
            {
                return Err(invalid(format!(
                    "lane {channel} at {offset} overlaps region {start}..{}",
                    start + len
                )));
            }
            regions.push((offset, lane_bytes));
            lane_offsets.push(offset);
        }

        let base = memory.as_ptr();
        // SAFETY: every offset was bounds and alignment checked above.
        let indices = unsafe { base.add(desc.index_pair_offset) } as *const RingIndices;
        let lanes = lane_offsets
            .into_iter()
            .map(|off| unsafe { base.add(off) } as *mut f32)
            .collect();

        debug!(capacity, channel_count, "external ring view attached");

        Ok(Self {
            capacity,
            indices,
            lanes,
            _memory: PhantomData,
        })
    }
}

unsafe impl RingStore for ExternalView<'_> {
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
        // SAFETY: validated in `from_layout`; the memory outlives `'a`.
        unsafe { &*self.indices }
    }

    #[inline]
    fn lane_ptr(&self, channel: usize) -> *mut f32 {
        self.lanes[channel]
    }
}

impl std::fmt::Debug for ExternalView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalView")
            .field("capacity", &self.capacity)
            .field("channel_count", &self.lanes.len())
            .finish()
    }
}

/// Bytes a fresh [`SharedMemory`] needs to hold one layout written by
/// [`write_layout`], including the allocator's reserved null word.
///
/// Returns `None` on arithmetic overflow.
pub fn layout_byte_len(capacity: usize, channel_count: usize) -> Option<usize> {
    let lane_bytes = capacity.checked_add(1)?.checked_mul(SAMPLE_BYTES)?;
    let lanes = lane_bytes.checked_mul(channel_count)?;
    let header = 2 * WORD_BYTES + RingIndices::BYTES + channel_count.checked_mul(WORD_BYTES)?;
    MEMORY_ALIGN.checked_add(header)?.checked_add(lanes)
}

/// Lay out a zeroed ring of `capacity` frames and `channel_count` lanes.
///
/// This is the host-module side of the external construction path: it
/// reserves the header words, index pair, lane table and lanes, fills in the
/// header, and returns the descriptor the other context needs.
///
/// # Errors
/// - `FreeQueueError::Constructor` for an unsupported geometry.
/// - `FreeQueueError::Allocation` if the allocator runs out of memory.
pub fn write_layout(
    heap: &mut LinearAllocator<'_>,
    capacity: usize,
    channel_count: usize,
) -> Result<LayoutDescriptor> {
    validate_geometry(capacity, channel_count)?;
    let lane_len = capacity + 1;
    let lane_bytes = lane_len * SAMPLE_BYTES;

    let buffer_length_offset = heap.alloc(WORD_BYTES, WORD_BYTES)?;
    let channel_count_offset = heap.alloc(WORD_BYTES, WORD_BYTES)?;
    let index_pair_offset = heap.alloc(RingIndices::BYTES, WORD_BYTES)?;
    let channel_lane_table_offset = heap.alloc(channel_count * WORD_BYTES, WORD_BYTES)?;

    let mut lane_offsets = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        lane_offsets.push(heap.alloc(lane_bytes, SAMPLE_BYTES)?);
    }

    let mem = heap.memory_mut();
    let layout_err = || FreeQueueError::InvalidLayout("allocated word out of bounds".into());
    mem.write_u32(buffer_length_offset, lane_len as u32)
        .ok_or_else(layout_err)?;
    mem.write_u32(channel_count_offset, channel_count as u32)
        .ok_or_else(layout_err)?;
    mem.zero(index_pair_offset, RingIndices::BYTES)
        .ok_or_else(layout_err)?;
    for (channel, &offset) in lane_offsets.iter().enumerate() {
        let entry = channel_lane_table_offset + channel * WORD_BYTES;
        mem.write_u32(entry, offset as u32).ok_or_else(layout_err)?;
        mem.zero(offset, lane_bytes).ok_or_else(layout_err)?;
    }

    Ok(LayoutDescriptor {
        buffer_length_offset,
        channel_count_offset,
        index_pair_offset,
        channel_lane_table_offset,
    })
}

fn overlaps(a: usize, a_len: usize, b: usize, b_len: usize) -> bool {
    a < b + b_len && b < a + a_len
}

fn invalid(msg: impl Into<String>) -> FreeQueueError {
    FreeQueueError::InvalidLayout(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(mem: &SharedMemory, desc: LayoutDescriptor) -> Result<ExternalView<'_>> {
        // SAFETY: each test drives at most one push side and one pull side.
        unsafe { ExternalView::from_layout(mem, desc) }
    }

    fn fresh(capacity: usize, channels: usize) -> (SharedMemory, LayoutDescriptor) {
        let mut mem = SharedMemory::new(layout_byte_len(capacity, channels).unwrap()).unwrap();
        let desc = {
            let mut heap = LinearAllocator::new(&mut mem);
            write_layout(&mut heap, capacity, channels).unwrap()
        };
        (mem, desc)
    }

    #[test]
    fn written_layout_round_trips_into_a_view() {
        let (mem, desc) = fresh(16, 2);
        let view = attach(&mem, desc).unwrap();
        assert_eq!(view.capacity(), 16);
        assert_eq!(view.channel_count(), 2);
        assert_eq!(view.lane_len(), 17);
        assert_eq!(view.indices().load(), (0, 0));
        assert_eq!(mem.read_u32(desc.buffer_length_offset), Some(17));
        assert_eq!(mem.read_u32(desc.channel_count_offset), Some(2));
    }

    #[test]
    fn layout_byte_len_is_exact_for_written_layouts() {
        let needed = layout_byte_len(10, 3).unwrap();
        let mut mem = SharedMemory::new(needed).unwrap();
        let mut heap = LinearAllocator::new(&mut mem);
        write_layout(&mut heap, 10, 3).unwrap();
        assert_eq!(heap.used(), needed);
    }

    #[test]
    fn too_small_memory_fails_allocation() {
        let needed = layout_byte_len(10, 3).unwrap();
        let mut mem = SharedMemory::new(needed - 4).unwrap();
        let mut heap = LinearAllocator::new(&mut mem);
        assert!(matches!(
            write_layout(&mut heap, 10, 3),
            Err(FreeQueueError::Allocation { .. })
        ));
    }

    #[test]
    fn two_views_share_indices_and_lanes() {
        let (mem, desc) = fresh(8, 1);
        let a = attach(&mem, desc).unwrap();
        let b = attach(&mem, desc).unwrap();
        unsafe { a.write_lane(0, 2, &[4.0, 5.0]) };
        a.indices().store_write(4);
        let mut out = [0.0f32; 2];
        unsafe { b.read_lane(0, 2, &mut out) };
        assert_eq!(out, [4.0, 5.0]);
        assert_eq!(b.indices().load_write(), 4);
    }

    #[test]
    fn zero_channel_count_is_rejected() {
        let (mut mem, desc) = fresh(8, 2);
        mem.write_u32(desc.channel_count_offset, 0).unwrap();
        let err = attach(&mem, desc).unwrap_err();
        assert!(matches!(err, FreeQueueError::InvalidLayout(_)), "{err}");
    }

    #[test]
    fn lane_outside_memory_is_rejected() {
        let (mut mem, desc) = fresh(8, 2);
        let past_end = mem.len() as u32;
        mem.write_u32(desc.channel_lane_table_offset + 4, past_end)
            .unwrap();
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn lane_overlapping_index_pair_is_rejected() {
        let (mut mem, desc) = fresh(8, 1);
        mem.write_u32(desc.channel_lane_table_offset, desc.index_pair_offset as u32)
            .unwrap();
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn overlapping_lanes_are_rejected() {
        let (mut mem, desc) = fresh(8, 2);
        let lane0 = mem.read_u32(desc.channel_lane_table_offset).unwrap();
        mem.write_u32(desc.channel_lane_table_offset + 4, lane0 + 4)
            .unwrap();
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn overlapping_header_words_are_rejected() {
        let (mem, mut desc) = fresh(8, 1);
        desc.index_pair_offset = desc.buffer_length_offset;
        let err = attach(&mem, desc).unwrap_err();
        assert!(matches!(err, FreeQueueError::InvalidLayout(_)), "{err}");

        let (mem, mut desc) = fresh(8, 2);
        desc.channel_count_offset = desc.channel_lane_table_offset + WORD_BYTES;
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn out_of_range_cursors_are_rejected_at_attach() {
        let (mut mem, desc) = fresh(8, 1);
        mem.write_u32(desc.index_pair_offset + WORD_BYTES, 9)
            .unwrap();
        let err = attach(&mem, desc).unwrap_err();
        assert!(matches!(err, FreeQueueError::InvalidLayout(_)), "{err}");

        // In-range cursors from a ring already in use are accepted.
        mem.write_u32(desc.index_pair_offset, 8).unwrap();
        mem.write_u32(desc.index_pair_offset + WORD_BYTES, 3)
            .unwrap();
        let view = attach(&mem, desc).unwrap();
        assert_eq!(view.indices().load(), (8, 3));
    }

    #[test]
    fn misaligned_offsets_are_rejected() {
        let (mem, mut desc) = fresh(8, 1);
        desc.index_pair_offset += 2;
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn degenerate_lane_length_is_rejected() {
        let (mut mem, desc) = fresh(8, 1);
        mem.write_u32(desc.buffer_length_offset, 1).unwrap();
        assert!(matches!(
            attach(&mem, desc),
            Err(FreeQueueError::InvalidLayout(_))
        ));
    }

    #[test]
    fn descriptor_serializes_in_camel_case() {
        let desc = LayoutDescriptor {
            buffer_length_offset: 8,
            channel_count_offset: 12,
            index_pair_offset: 16,
            channel_lane_table_offset: 24,
        };
        let json = serde_json::to_value(desc).unwrap();
        assert_eq!(json["bufferLengthOffset"], 8);
        assert_eq!(json["channelLaneTableOffset"], 24);
        let back: LayoutDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }
}
