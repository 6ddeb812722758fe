//! State shared between the producer, consumer and reporting threads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use freequeue_core::{QueueSnapshot, StatsSnapshot};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Default)]
pub struct AppState {
    /// Quanta the consumer rendered from queued audio.
    pub quanta_rendered: AtomicUsize,
    /// Quanta the consumer had to fill with silence.
    pub quanta_starved: AtomicUsize,
    /// Blocks the producer skipped because the ring stayed full.
    pub blocks_dropped: AtomicUsize,
    /// Latest view published by the consumer after each quantum.
    pub latest: Mutex<Option<ConsumerView>>,
    /// How late each render callback woke up.
    pub lateness: Mutex<LatenessWindow>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerView {
    pub queue: QueueSnapshot,
    pub stats: StatsSnapshot,
    pub last_rms: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDiagnostics {
    pub quanta_rendered: usize,
    pub quanta_starved: usize,
    pub blocks_dropped: usize,
    pub consumer: Option<ConsumerView>,
    pub lateness_ms: LatenessSnapshot,
}

impl AppState {
    pub fn publish(&self, view: ConsumerView) {
        *self.latest.lock() = Some(view);
    }

    pub fn diagnostics_snapshot(&self) -> AppDiagnostics {
        AppDiagnostics {
            quanta_rendered: self.quanta_rendered.load(Ordering::Relaxed),
            quanta_starved: self.quanta_starved.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            consumer: *self.latest.lock(),
            lateness_ms: self.lateness.lock().snapshot(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatenessSnapshot {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// Rolling window over the most recent samples; `count`, mean and max
/// cover the whole run.
#[derive(Debug)]
pub struct LatenessWindow {
    samples: VecDeque<f64>,
    cap: usize,
    count: usize,
    sum_ms: f64,
    max_ms: f64,
}

impl Default for LatenessWindow {
    fn default() -> Self {
        Self {
            samples: VecDeque::with_capacity(512),
            cap: 512,
            count: 0,
            sum_ms: 0.0,
            max_ms: 0.0,
        }
    }
}

impl LatenessWindow {
    pub fn record(&mut self, late_ms: f64) {
        let v = if late_ms.is_finite() {
            late_ms.max(0.0)
        } else {
            0.0
        };
        if self.samples.len() == self.cap {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back(v);
        self.count += 1;
        self.sum_ms += v;
        self.max_ms = self.max_ms.max(v);
    }

    pub fn snapshot(&self) -> LatenessSnapshot {
        if self.count == 0 {
            return LatenessSnapshot::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        LatenessSnapshot {
            count: self.count,
            mean_ms: self.sum_ms / self.count as f64,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            max_ms: self.max_ms,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
