//! Single-threaded multichannel ring with overwrite-on-overflow.
//!
//! `HeapQueue` uses the same per-channel lane layout as the shared ring but
//! no atomics, so it is only for use inside one context (e.g. staging audio
//! between a wasm kernel and its caller on the same thread).
//!
//! It differs from [`FreeQueue`](crate::queue::FreeQueue) in two ways:
//! - pushing into a full ring discards the oldest unread frames instead of
//!   rejecting the block;
//! - the active channel count can be narrowed after construction with
//!   [`adapt_channel`](HeapQueue::adapt_channel), without reshaping memory.

use tracing::debug;

use crate::error::{FreeQueueError, Result, TransferError};
use crate::store::{MAX_CAPACITY_FRAMES, MAX_CHANNEL_COUNT};

#[derive(Debug, Clone)]
pub struct HeapQueue {
    length: usize,
    channel_count: usize,
    max_channel_count: usize,
    read: usize,
    write: usize,
    available: usize,
    lanes: Vec<Vec<f32>>,
}

impl HeapQueue {
    /// Allocate lanes of `length` frames for
    /// `max(channel_count, max_channel_count)` channels, with
    /// `channel_count` of them active.
    ///
    /// # Errors
    /// - `FreeQueueError::Constructor` for zero or oversized arguments.
    /// - `FreeQueueError::Allocation` if the lanes cannot be reserved.
    pub fn new(
        length: usize,
        channel_count: usize,
        max_channel_count: Option<usize>,
    ) -> Result<Self> {
        if length == 0 || length > MAX_CAPACITY_FRAMES {
            return Err(FreeQueueError::Constructor(format!(
                "length must be in 1..={MAX_CAPACITY_FRAMES}, got {length}"
            )));
        }
        if channel_count == 0 {
            return Err(FreeQueueError::Constructor(
                "channel count must be non-zero".into(),
            ));
        }
        let max_channel_count = max_channel_count.unwrap_or(channel_count).max(channel_count);
        if max_channel_count > MAX_CHANNEL_COUNT {
            return Err(FreeQueueError::Constructor(format!(
                "channel count must be <= {MAX_CHANNEL_COUNT}"
            )));
        }

        let mut lanes = Vec::with_capacity(max_channel_count);
        for _ in 0..max_channel_count {
            let mut lane: Vec<f32> = Vec::new();
            lane.try_reserve_exact(length)
                .map_err(|_| FreeQueueError::Allocation {
                    bytes: length * std::mem::size_of::<f32>(),
                })?;
            lane.resize(length, 0.0);
            lanes.push(lane);
        }

        Ok(Self {
            length,
            channel_count,
            max_channel_count,
            read: 0,
            write: 0,
            available: 0,
            lanes,
        })
    }

    /// Frames the ring holds when full.
    pub fn capacity(&self) -> usize {
        self.length
    }

    /// Frames currently buffered.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Active channel count.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn max_channel_count(&self) -> usize {
        self.max_channel_count
    }

    /// Narrow the active channel count.
    ///
    /// Only takes effect when `new_count < max_channel_count()`; any other
    /// request is ignored and the current count is kept.
    pub fn adapt_channel(&mut self, new_count: usize) {
        if new_count < self.max_channel_count {
            self.channel_count = new_count;
        } else {
            debug!(
                requested = new_count,
                max = self.max_channel_count,
                "adapt_channel ignored"
            );
        }
    }

    /// Raw lane storage for `channel` (any lane up to the max channel count).
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        self.lanes.get(channel).map(Vec::as_slice)
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        self.lanes.get_mut(channel).map(Vec::as_mut_slice)
    }

    /// Append `frames` frames from `input`, one slice per active channel.
    ///
    /// Never rejects for lack of space: when the ring overflows the oldest
    /// unread frames are dropped. Returns how many frames were dropped,
    /// counting leading input frames that could never fit.
    pub fn push<B: AsRef<[f32]>>(
        &mut self,
        input: &[B],
        frames: usize,
    ) -> std::result::Result<usize, TransferError> {
        self.check_block(input.iter().map(|b| b.as_ref().len()), frames)?;

        let keep = frames.min(self.length);
        let skipped = frames - keep;
        let overflow = (self.available + keep).saturating_sub(self.length);

        let write = self.write;
        let head = keep.min(self.length - write);
        for (lane, block) in self.lanes.iter_mut().zip(input) {
            let src = &block.as_ref()[skipped..frames];
            lane[write..write + head].copy_from_slice(&src[..head]);
            lane[..keep - head].copy_from_slice(&src[head..]);
        }

        self.write = wrap(write + keep, self.length);
        self.available = (self.available + keep).min(self.length);
        if overflow > 0 {
            self.read = wrap(self.read + overflow, self.length);
        }
        Ok(skipped + overflow)
    }

    /// Move up to `frames` frames into `output`, one slice per active
    /// channel. Returns how many frames were copied; destination samples past
    /// that count are left untouched.
    pub fn pull<B: AsMut<[f32]>>(
        &mut self,
        output: &mut [B],
        frames: usize,
    ) -> std::result::Result<usize, TransferError> {
        self.check_block(output.iter_mut().map(|b| b.as_mut().len()), frames)?;

        let n = frames.min(self.available);
        let read = self.read;
        let head = n.min(self.length - read);
        for (lane, block) in self.lanes.iter().zip(output.iter_mut()) {
            let dst = &mut block.as_mut()[..n];
            dst[..head].copy_from_slice(&lane[read..read + head]);
            dst[head..].copy_from_slice(&lane[..n - head]);
        }

        self.read = wrap(read + n, self.length);
        self.available -= n;
        Ok(n)
    }

    /// Zero all lanes and forget buffered frames.
    pub fn reset(&mut self) {
        for lane in &mut self.lanes {
            lane.fill(0.0);
        }
        self.read = 0;
        self.write = 0;
        self.available = 0;
    }

    fn check_block(
        &self,
        lens: impl ExactSizeIterator<Item = usize>,
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        if lens.len() != self.channel_count {
            return Err(TransferError::ChannelMismatch {
                expected: self.channel_count,
                actual: lens.len(),
            });
        }
        for (channel, len) in lens.enumerate() {
            if len < frames {
                return Err(TransferError::BlockTooShort {
                    channel,
                    len,
                    frames,
                });
            }
        }
        Ok(())
    }
}

/// `index` is below `2 * len`, so one subtraction wraps it.
#[inline]
fn wrap(index: usize, len: usize) -> usize {
    if index >= len {
        index - len
    } else {
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| start + i as f32).collect()
    }

    #[test]
    fn push_pull_in_order() {
        let mut q = HeapQueue::new(8, 2, None).unwrap();
        let input = [ramp(0.0, 5), ramp(10.0, 5)];
        assert_eq!(q.push(&input, 5), Ok(0));
        assert_eq!(q.available(), 5);

        let mut out = [vec![0.0f32; 5], vec![0.0f32; 5]];
        assert_eq!(q.pull(&mut out, 5), Ok(5));
        assert_eq!(out, input);
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn overflow_discards_oldest_frames() {
        let mut q = HeapQueue::new(4, 1, None).unwrap();
        assert_eq!(q.push(&[ramp(0.0, 3)], 3), Ok(0));
        // 3 buffered + 3 new into 4 slots: frames 0 and 1 are dropped
        assert_eq!(q.push(&[ramp(3.0, 3)], 3), Ok(2));
        assert_eq!(q.available(), 4);

        let mut out = [vec![0.0f32; 4]];
        assert_eq!(q.pull(&mut out, 4), Ok(4));
        assert_eq!(out[0], vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn block_longer_than_ring_keeps_newest_frames() {
        let mut q = HeapQueue::new(4, 1, None).unwrap();
        assert_eq!(q.push(&[ramp(100.0, 1)], 1), Ok(0));
        // 1 old frame dropped plus the 2 leading frames that can never fit
        assert_eq!(q.push(&[ramp(0.0, 6)], 6), Ok(3));

        let mut out = [vec![0.0f32; 4]];
        assert_eq!(q.pull(&mut out, 4), Ok(4));
        assert_eq!(out[0], vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn partial_pull_leaves_tail_untouched() {
        let mut q = HeapQueue::new(8, 1, None).unwrap();
        q.push(&[ramp(1.0, 2)], 2).unwrap();
        let mut out = [vec![-1.0f32; 4]];
        assert_eq!(q.pull(&mut out, 4), Ok(2));
        assert_eq!(out[0], vec![1.0, 2.0, -1.0, -1.0]);
    }

    #[test]
    fn pull_from_empty_copies_nothing() {
        let mut q = HeapQueue::new(8, 1, None).unwrap();
        let mut out = [vec![-1.0f32; 2]];
        assert_eq!(q.pull(&mut out, 2), Ok(0));
        assert_eq!(out[0], vec![-1.0, -1.0]);
    }

    #[test]
    fn wraps_across_lane_end() {
        let mut q = HeapQueue::new(5, 1, None).unwrap();
        q.push(&[ramp(0.0, 4)], 4).unwrap();
        let mut out = [vec![0.0f32; 3]];
        q.pull(&mut out, 3).unwrap();
        q.push(&[ramp(4.0, 3)], 3).unwrap();
        let mut out = [vec![0.0f32; 4]];
        assert_eq!(q.pull(&mut out, 4), Ok(4));
        assert_eq!(out[0], vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn adapt_channel_narrows_below_max() {
        let mut q = HeapQueue::new(8, 2, Some(4)).unwrap();
        assert_eq!(q.max_channel_count(), 4);
        q.adapt_channel(1);
        assert_eq!(q.channel_count(), 1);
        q.adapt_channel(3);
        assert_eq!(q.channel_count(), 3);
        assert_eq!(q.push(&[[1.0f32], [2.0], [3.0]], 1), Ok(0));
    }

    // Requests at or above the max are dropped without an error. Callers
    // relying on a widened layout get no signal that nothing changed.
    #[test]
    fn adapt_channel_at_or_above_max_is_silent_noop() {
        let mut q = HeapQueue::new(8, 2, Some(4)).unwrap();
        q.adapt_channel(4);
        assert_eq!(q.channel_count(), 2);
        q.adapt_channel(9);
        assert_eq!(q.channel_count(), 2);

        let mut fixed = HeapQueue::new(8, 2, None).unwrap();
        fixed.adapt_channel(2);
        assert_eq!(fixed.channel_count(), 2);
    }

    #[test]
    fn max_below_channel_count_is_raised() {
        let q = HeapQueue::new(8, 3, Some(1)).unwrap();
        assert_eq!(q.max_channel_count(), 3);
        assert_eq!(q.channel_count(), 3);
    }

    #[test]
    fn rejects_invalid_arguments() {
        assert!(matches!(
            HeapQueue::new(0, 1, None),
            Err(FreeQueueError::Constructor(_))
        ));
        assert!(matches!(
            HeapQueue::new(8, 0, None),
            Err(FreeQueueError::Constructor(_))
        ));
        assert!(matches!(
            HeapQueue::new(8, 1, Some(MAX_CHANNEL_COUNT + 1)),
            Err(FreeQueueError::Constructor(_))
        ));
    }

    #[test]
    fn inactive_lanes_are_not_touched() {
        let mut q = HeapQueue::new(4, 2, Some(3)).unwrap();
        q.adapt_channel(1);
        q.push(&[[7.0f32, 7.0]], 2).unwrap();
        assert_eq!(q.channel(0).unwrap()[..2], [7.0, 7.0]);
        assert_eq!(q.channel(1).unwrap(), &[0.0f32; 4]);
        assert!(q.channel(3).is_none());
    }

    #[test]
    fn channel_mut_edits_buffered_frames_in_place() {
        let mut q = HeapQueue::new(4, 2, None).unwrap();
        q.push(&[[1.0f32, 2.0], [3.0, 4.0]], 2).unwrap();
        // Apply gain to the right channel before it is pulled.
        for s in q.channel_mut(1).unwrap()[..2].iter_mut() {
            *s *= 0.5;
        }
        assert!(q.channel_mut(2).is_none());

        let mut out = [vec![0.0f32; 2], vec![0.0f32; 2]];
        assert_eq!(q.pull(&mut out, 2), Ok(2));
        assert_eq!(out, [vec![1.0, 2.0], vec![1.5, 2.0]]);
    }

    #[test]
    fn reset_clears_state() {
        let mut q = HeapQueue::new(4, 1, None).unwrap();
        q.push(&[ramp(1.0, 3)], 3).unwrap();
        q.reset();
        assert_eq!(q.available(), 0);
        assert_eq!(q.channel(0).unwrap(), &[0.0f32; 4]);
    }
}
