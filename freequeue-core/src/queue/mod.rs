//! Push, pull and the availability arithmetic over a `RingStore`.
//!
//! ## Cursor discipline
//!
//! ```text
//! producer: load read ─► check free ─► write lanes ─► store write (Release)
//! consumer: load write ─► check level ─► read lanes ─► store read  (Release)
//! ```
//!
//! Each cursor has exactly one writer. A cursor store is the only act that
//! hands slots to the other side, so the slots between `read` and `write`
//! belong to the consumer and the rest belong to the producer. Neither side
//! ever blocks: a block that does not fit is rejected whole.
//!
//! Cursors live in `[0, capacity]` and wrap by subtracting the lane length
//! (`capacity + 1`), never by modulo.

pub mod split;

use tracing::{info, trace};

use crate::diagnostics::{QueueSnapshot, StatsSnapshot, TransferStats};
use crate::error::{FreeQueueError, Result, TransferError};
use crate::memory::SharedMemory;
use crate::store::{ExternalView, LayoutDescriptor, OwningStore, RingStore};

pub use split::{QueueConsumer, QueueProducer};

/// Free slots given both cursors.
#[inline]
pub fn available_write(read: usize, write: usize, capacity: usize) -> usize {
    if write >= read {
        capacity - write + read
    } else {
        read - write - 1
    }
}

/// Buffered frames given both cursors.
#[inline]
pub fn available_read(read: usize, write: usize, capacity: usize) -> usize {
    if write >= read {
        write - read
    } else {
        write + (capacity + 1) - read
    }
}

/// Multichannel SPSC ring over a [`RingStore`].
///
/// On a single thread, use `push`/`pull` directly. To hand the two ends to
/// different threads, [`split`](Self::split) the queue.
pub struct FreeQueue<S: RingStore = OwningStore> {
    store: S,
    stats: TransferStats,
}

impl FreeQueue<OwningStore> {
    /// Allocate a queue holding up to `capacity` frames of `channel_count`
    /// channels.
    ///
    /// # Errors
    /// - `FreeQueueError::Constructor` for zero or oversized arguments.
    /// - `FreeQueueError::Allocation` if the lanes cannot be reserved.
    pub fn new(capacity: usize, channel_count: usize) -> Result<Self> {
        let queue = Self::with_store(OwningStore::create(capacity, channel_count)?);
        info!(capacity, channel_count, "free queue created");
        Ok(queue)
    }
}

impl<'a> FreeQueue<ExternalView<'a>> {
    /// Attach to a ring that another party laid out in `memory`.
    ///
    /// # Errors
    /// `FreeQueueError::InvalidLayout` if `desc` does not describe a
    /// consistent ring inside `memory`.
    ///
    /// # Safety
    /// Every view of the same layout shares one pair of cursors. Across all
    /// of them, at most one context may push and at most one may pull at any
    /// time, and `reset` must not overlap any push or pull.
    pub unsafe fn from_external_layout(
        memory: &'a SharedMemory,
        desc: LayoutDescriptor,
    ) -> Result<Self> {
        // SAFETY: the caller upholds the same contract for every view.
        let view = unsafe { ExternalView::from_layout(memory, desc)? };
        Ok(Self::with_store(view))
    }
}

impl<S: RingStore> FreeQueue<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            stats: TransferStats::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.store.channel_count()
    }

    pub fn available_read(&self) -> usize {
        let (read, write) = self.store.indices().load();
        available_read(read, write, self.capacity())
    }

    pub fn available_write(&self) -> usize {
        let (read, write) = self.store.indices().load();
        available_write(read, write, self.capacity())
    }

    /// `true` if at least `frames` frames can be pulled right now.
    pub fn is_frame_available(&self, frames: usize) -> bool {
        self.available_read() >= frames
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let (read, write) = self.store.indices().load();
        let capacity = self.capacity();
        QueueSnapshot {
            available_read: available_read(read, write, capacity),
            available_write: available_write(read, write, capacity),
            capacity,
            channel_count: self.channel_count(),
        }
    }

    /// Counters for calls made through this handle only.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Push `frames` frames from `input` (one slice per channel).
    ///
    /// All or nothing: on error nothing is copied and no cursor moves.
    pub fn try_push<B: AsRef<[f32]>>(
        &mut self,
        input: &[B],
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        // SAFETY: `&mut self` makes this the only producer on this handle.
        unsafe { self.push_shared(input, frames) }
    }

    /// [`try_push`](Self::try_push) reduced to success/failure.
    pub fn push<B: AsRef<[f32]>>(&mut self, input: &[B], frames: usize) -> bool {
        self.try_push(input, frames).is_ok()
    }

    /// Pull `frames` frames into `output` (one slice per channel).
    ///
    /// All or nothing: on error `output` is left untouched.
    pub fn try_pull<B: AsMut<[f32]>>(
        &mut self,
        output: &mut [B],
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        // SAFETY: `&mut self` makes this the only consumer on this handle.
        unsafe { self.pull_shared(output, frames) }
    }

    /// [`try_pull`](Self::try_pull) reduced to success/failure.
    pub fn pull<B: AsMut<[f32]>>(&mut self, output: &mut [B], frames: usize) -> bool {
        self.try_pull(output, frames).is_ok()
    }

    /// Zero every lane and rewind both cursors. Session boundary only.
    pub fn reset(&mut self) {
        // SAFETY: `&mut self` excludes pushes and pulls on this handle; other
        // views are covered by the `from_external_layout` contract.
        unsafe { self.store.clear_lanes() };
        let indices = self.store.indices();
        indices.store_read(0);
        indices.store_write(0);
        self.stats.reset();
    }

    /// Split into a producer and a consumer that can live on different
    /// threads.
    pub fn split(self) -> (QueueProducer<S>, QueueConsumer<S>) {
        split::split(self)
    }

    /// # Safety
    /// No other push may run concurrently against the same store.
    pub(crate) unsafe fn push_shared<B: AsRef<[f32]>>(
        &self,
        input: &[B],
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        self.check_block(input.iter().map(|b| b.as_ref().len()), frames)?;

        let capacity = self.capacity();
        let indices = self.store.indices();
        let (read, write) = indices.load();
        check_cursors(read, write, capacity)?;

        let available = available_write(read, write, capacity);
        if available < frames {
            self.stats.record_overrun();
            trace!(requested = frames, available, "push rejected: overrun");
            return Err(TransferError::Overrun {
                requested: frames,
                available,
            });
        }
        if frames == 0 {
            return Ok(());
        }

        let lane_len = capacity + 1;
        let mut next = write + frames;
        if next > lane_len {
            let head = lane_len - write;
            for (channel, block) in input.iter().enumerate() {
                let src = &block.as_ref()[..frames];
                self.store.write_lane(channel, write, &src[..head]);
                self.store.write_lane(channel, 0, &src[head..]);
            }
            next -= lane_len;
        } else {
            for (channel, block) in input.iter().enumerate() {
                self.store
                    .write_lane(channel, write, &block.as_ref()[..frames]);
            }
            if next == lane_len {
                next = 0;
            }
        }

        // Publish only after every lane write above.
        indices.store_write(next);
        self.stats.record_push(frames);
        Ok(())
    }

    /// # Safety
    /// No other pull may run concurrently against the same store.
    pub(crate) unsafe fn pull_shared<B: AsMut<[f32]>>(
        &self,
        output: &mut [B],
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        self.check_block(output.iter_mut().map(|b| b.as_mut().len()), frames)?;

        let capacity = self.capacity();
        let indices = self.store.indices();
        let (read, write) = indices.load();
        check_cursors(read, write, capacity)?;

        let available = available_read(read, write, capacity);
        if available < frames {
            self.stats.record_underrun();
            trace!(requested = frames, available, "pull rejected: underrun");
            return Err(TransferError::Underrun {
                requested: frames,
                available,
            });
        }
        if frames == 0 {
            return Ok(());
        }

        let lane_len = capacity + 1;
        let mut next = read + frames;
        if next > lane_len {
            let head = lane_len - read;
            for (channel, block) in output.iter_mut().enumerate() {
                let dst = &mut block.as_mut()[..frames];
                let (first, second) = dst.split_at_mut(head);
                self.store.read_lane(channel, read, first);
                self.store.read_lane(channel, 0, second);
            }
            next -= lane_len;
        } else {
            for (channel, block) in output.iter_mut().enumerate() {
                self.store
                    .read_lane(channel, read, &mut block.as_mut()[..frames]);
            }
            if next == lane_len {
                next = 0;
            }
        }

        // Release the slots only after every lane read above.
        indices.store_read(next);
        self.stats.record_pull(frames);
        Ok(())
    }

    fn check_block(
        &self,
        lens: impl ExactSizeIterator<Item = usize>,
        frames: usize,
    ) -> std::result::Result<(), TransferError> {
        let expected = self.channel_count();
        if lens.len() != expected {
            return Err(TransferError::ChannelMismatch {
                expected,
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

/// Cursors written by a peer through shared memory are not trusted blindly:
/// an out-of-range value would turn the lane copy into an out-of-bounds one.
#[inline]
fn check_cursors(
    read: usize,
    write: usize,
    capacity: usize,
) -> std::result::Result<(), TransferError> {
    if read > capacity || write > capacity {
        return Err(TransferError::CorruptCursor { read, write });
    }
    Ok(())
}

impl<S: RingStore> std::fmt::Debug for FreeQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeQueue")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl TryFrom<&crate::config::QueueConfig> for FreeQueue<OwningStore> {
    type Error = FreeQueueError;

    fn try_from(config: &crate::config::QueueConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.capacity_frames, config.channel_count)
    }
}
