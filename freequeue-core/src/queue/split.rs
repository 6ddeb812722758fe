//! Producer/consumer halves of a split [`FreeQueue`].
//!
//! Neither half is `Clone`, so the single-producer/single-consumer contract
//! holds by construction. Each half is `Send` and can move to its own thread.

use std::sync::Arc;

use super::FreeQueue;
use crate::diagnostics::{QueueSnapshot, StatsSnapshot};
use crate::error::TransferError;
use crate::store::{OwningStore, RingStore};

/// Push end, held by the context that produces audio.
pub struct QueueProducer<S: RingStore = OwningStore> {
    queue: Arc<FreeQueue<S>>,
}

/// Pull end, held by the context that renders audio.
pub struct QueueConsumer<S: RingStore = OwningStore> {
    queue: Arc<FreeQueue<S>>,
}

impl<S: RingStore> std::fmt::Debug for QueueProducer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProducer")
            .field("snapshot", &self.queue.snapshot())
            .finish()
    }
}

impl<S: RingStore> std::fmt::Debug for QueueConsumer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("snapshot", &self.queue.snapshot())
            .finish()
    }
}

pub(super) fn split<S: RingStore>(queue: FreeQueue<S>) -> (QueueProducer<S>, QueueConsumer<S>) {
    let queue = Arc::new(queue);
    (
        QueueProducer {
            queue: Arc::clone(&queue),
        },
        QueueConsumer { queue },
    )
}

impl<S: RingStore> QueueProducer<S> {
    pub fn try_push<B: AsRef<[f32]>>(
        &mut self,
        input: &[B],
        frames: usize,
    ) -> Result<(), TransferError> {
        // SAFETY: there is exactly one producer per split queue.
        unsafe { self.queue.push_shared(input, frames) }
    }

    pub fn push<B: AsRef<[f32]>>(&mut self, input: &[B], frames: usize) -> bool {
        self.try_push(input, frames).is_ok()
    }

    pub fn available_write(&self) -> usize {
        self.queue.available_write()
    }

    pub fn available_read(&self) -> usize {
        self.queue.available_read()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn channel_count(&self) -> usize {
        self.queue.channel_count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.queue.stats()
    }

    /// Reassemble the queue, e.g. to `reset` it between sessions.
    ///
    /// Fails, handing both halves back, if `consumer` came from a different
    /// queue.
    pub fn rejoin(
        self,
        consumer: QueueConsumer<S>,
    ) -> Result<FreeQueue<S>, (QueueProducer<S>, QueueConsumer<S>)> {
        if !Arc::ptr_eq(&self.queue, &consumer.queue) {
            return Err((self, consumer));
        }
        drop(consumer);
        match Arc::into_inner(self.queue) {
            Some(queue) => Ok(queue),
            None => unreachable!("a split queue has exactly two owners"),
        }
    }
}

impl<S: RingStore> QueueConsumer<S> {
    pub fn try_pull<B: AsMut<[f32]>>(
        &mut self,
        output: &mut [B],
        frames: usize,
    ) -> Result<(), TransferError> {
        // SAFETY: there is exactly one consumer per split queue.
        unsafe { self.queue.pull_shared(output, frames) }
    }

    pub fn pull<B: AsMut<[f32]>>(&mut self, output: &mut [B], frames: usize) -> bool {
        self.try_pull(output, frames).is_ok()
    }

    pub fn available_read(&self) -> usize {
        self.queue.available_read()
    }

    pub fn available_write(&self) -> usize {
        self.queue.available_write()
    }

    pub fn is_frame_available(&self, frames: usize) -> bool {
        self.queue.is_frame_available(frames)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn channel_count(&self) -> usize {
        self.queue.channel_count()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.queue.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_share_one_ring() {
        let (mut tx, mut rx) = FreeQueue::new(8, 1).unwrap().split();
        assert!(tx.push(&[[1.0f32, 2.0, 3.0]], 3));
        assert_eq!(rx.available_read(), 3);
        assert!(rx.is_frame_available(3));

        let mut out = [[0.0f32; 3]];
        assert!(rx.pull(&mut out, 3));
        assert_eq!(out, [[1.0, 2.0, 3.0]]);
        assert_eq!(tx.available_write(), 8);
        assert_eq!(tx.stats().frames_pushed, 3);
        assert_eq!(rx.stats().frames_pulled, 3);
    }

    #[test]
    fn rejoin_recovers_queue_for_reset() {
        let (mut tx, rx) = FreeQueue::new(4, 1).unwrap().split();
        assert!(tx.push(&[[5.0f32; 2]], 2));
        let mut queue = tx.rejoin(rx).unwrap();
        assert_eq!(queue.available_read(), 2);
        queue.reset();
        assert_eq!(queue.available_read(), 0);
    }

    #[test]
    fn rejoin_rejects_foreign_consumer() {
        let (tx, _rx) = FreeQueue::new(4, 1).unwrap().split();
        let (_tx2, rx2) = FreeQueue::new(4, 1).unwrap().split();
        let (tx, rx2) = tx.rejoin(rx2).err().unwrap();
        assert_eq!(tx.capacity(), 4);
        assert_eq!(rx2.capacity(), 4);
    }

    #[test]
    fn halves_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<QueueProducer>();
        assert_send::<QueueConsumer>();
        assert_send::<QueueProducer<crate::store::ExternalView<'static>>>();
    }
}
