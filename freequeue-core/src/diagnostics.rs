//! Structured diagnostics for a queue.
//!
//! `QueueSnapshot` is the cursor-derived view (what a debug print of the
//! queue would show). `TransferStats` counts push/pull outcomes; the counters
//! are relaxed atomics so both halves of a split queue can bump them.
//!
//! Counters belong to one `FreeQueue` handle, not to the ring. The two halves
//! of a split queue share a handle and so see both sides. Separate views of
//! one external layout each count only their own calls: read availability
//! from `QueueSnapshot`, which every view derives from the shared cursors.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Point-in-time availability, derived from one load of both cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub available_read: usize,
    pub available_write: usize,
    pub capacity: usize,
    pub channel_count: usize,
}

/// Push/pull counters of a single queue handle.
pub struct TransferStats {
    pub pushes: AtomicUsize,
    pub pulls: AtomicUsize,
    pub overruns: AtomicUsize,
    pub underruns: AtomicUsize,
    pub frames_pushed: AtomicUsize,
    pub frames_pulled: AtomicUsize,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self {
            pushes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
            overruns: AtomicUsize::new(0),
            underruns: AtomicUsize::new(0),
            frames_pushed: AtomicUsize::new(0),
            frames_pulled: AtomicUsize::new(0),
        }
    }
}

impl TransferStats {
    pub(crate) fn record_push(&self, frames: usize) {
        self.pushes.fetch_add(1, Ordering::Relaxed);
        self.frames_pushed.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_pull(&self, frames: usize) {
        self.pulls.fetch_add(1, Ordering::Relaxed);
        self.frames_pulled.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.pushes.store(0, Ordering::Relaxed);
        self.pulls.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.frames_pushed.store(0, Ordering::Relaxed);
        self.frames_pulled.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pushes: self.pushes.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            frames_pushed: self.frames_pushed.load(Ordering::Relaxed),
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub pushes: usize,
    pub pulls: usize,
    pub overruns: usize,
    pub underruns: usize,
    pub frames_pushed: usize,
    pub frames_pulled: usize,
}

impl StatsSnapshot {
    /// Frames this handle pushed minus frames it pulled.
    ///
    /// Only meaningful when one handle does both, as with an unsplit queue or
    /// the halves of a split one. A push-only view reports everything it ever
    /// pushed.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_pushed.saturating_sub(self.frames_pulled)
    }
}
