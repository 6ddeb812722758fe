//! FreeQueue host application entry point.
//!
//! Wires a tone producer and a render-quantum consumer through one split
//! queue, each on its own thread, both paced at the configured sample rate.
//! The main thread only reports diagnostics and handles shutdown.

mod settings;
mod state;
mod tone;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{after, never, select, tick, Receiver, TryRecvError};
use freequeue_core::{FreeQueue, QueueConsumer, QueueProducer};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use state::{AppState, ConsumerView};
use tone::{rms, ToneGenerator};
use tracing::{debug, info, warn};

/// Shutdown is signalled by dropping the only sender.
fn stopped(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

/// Sleep until `deadline` and return how late the wakeup was.
fn sleep_until(deadline: Instant) -> Duration {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
    Instant::now().saturating_duration_since(deadline)
}

fn run_producer(
    mut tx: QueueProducer,
    settings: &AppSettings,
    state: &AppState,
    shutdown: &Receiver<()>,
) -> QueueProducer {
    let quantum = settings.queue.render_quantum_frames;
    let period = settings.quantum_period();
    let mut tone = ToneGenerator::new(settings.tone_hz, settings.sample_rate, settings.tone_gain);
    let mut block = vec![vec![0.0f32; quantum]; tx.channel_count()];

    // Start half full so the consumer has headroom against scheduling jitter.
    let prefill = settings.queue.quanta_per_ring() / 2;
    for _ in 0..prefill {
        tone.fill(&mut block, quantum);
        if !tx.push(&block, quantum) {
            break;
        }
    }
    debug!(quanta = prefill, "producer prefilled ring");

    let mut deadline = Instant::now();
    while !stopped(shutdown) {
        deadline += period;
        sleep_until(deadline);
        tone.fill(&mut block, quantum);
        if !tx.push(&block, quantum) {
            // A live source cannot wait for room; the block is lost.
            state.blocks_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
    tx
}

fn run_consumer(
    mut rx: QueueConsumer,
    settings: &AppSettings,
    state: &AppState,
    shutdown: &Receiver<()>,
) -> QueueConsumer {
    let quantum = settings.queue.render_quantum_frames;
    let period = settings.quantum_period();
    let mut block = vec![vec![0.0f32; quantum]; rx.channel_count()];

    let mut deadline = Instant::now();
    while !stopped(shutdown) {
        deadline += period;
        let late = sleep_until(deadline);
        state.lateness.lock().record(late.as_secs_f64() * 1000.0);

        let level = if rx.pull(&mut block, quantum) {
            state.quanta_rendered.fetch_add(1, Ordering::Relaxed);
            rms(&block, quantum)
        } else {
            // Underrun: render silence, as an audio callback would.
            for lane in block.iter_mut() {
                lane.fill(0.0);
            }
            state.quanta_starved.fetch_add(1, Ordering::Relaxed);
            0.0
        };

        state.publish(ConsumerView {
            queue: rx.snapshot(),
            stats: rx.stats(),
            last_rms: level,
        });
    }
    rx
}

fn report(state: &AppState) {
    let diag = state.diagnostics_snapshot();
    let Some(view) = diag.consumer else {
        debug!("consumer has not rendered a quantum yet");
        return;
    };
    info!(
        available_read = view.queue.available_read,
        available_write = view.queue.available_write,
        rendered = diag.quanta_rendered,
        starved = diag.quanta_starved,
        dropped = diag.blocks_dropped,
        overruns = view.stats.overruns,
        underruns = view.stats.underruns,
        rms = view.last_rms,
        late_p95_ms = diag.lateness_ms.p95_ms,
        "queue status"
    );
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("freequeue=info")),
        )
        .init();

    info!("FreeQueue starting");

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = default_settings_path();
    if !settings_path.exists() {
        if let Err(e) = save_settings(&settings_path, &AppSettings::default()) {
            warn!(settings_path = ?settings_path, error = %e, "could not write default settings");
        }
    }
    let settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        capacity_frames = settings.queue.capacity_frames,
        channel_count = settings.queue.channel_count,
        render_quantum_frames = settings.queue.render_quantum_frames,
        sample_rate = settings.sample_rate,
        tone_hz = settings.tone_hz,
        run_seconds = settings.run_seconds,
        "runtime settings loaded"
    );

    // ── Queue + worker threads ────────────────────────────────────────────
    let queue = FreeQueue::try_from(&settings.queue).context("failed to create queue")?;
    let (tx, rx) = queue.split();
    let settings = Arc::new(settings);
    let state = Arc::new(AppState::default());
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

    let producer = thread::Builder::new()
        .name("freequeue-producer".into())
        .spawn({
            let settings = Arc::clone(&settings);
            let state = Arc::clone(&state);
            let shutdown = shutdown_rx.clone();
            move || run_producer(tx, &settings, &state, &shutdown)
        })
        .context("failed to spawn producer thread")?;

    let consumer = thread::Builder::new()
        .name("freequeue-consumer".into())
        .spawn({
            let settings = Arc::clone(&settings);
            let state = Arc::clone(&state);
            let shutdown = shutdown_rx;
            move || run_consumer(rx, &settings, &state, &shutdown)
        })
        .context("failed to spawn consumer thread")?;

    // ── Report until the run ends ─────────────────────────────────────────
    let ticker = tick(Duration::from_millis(settings.report_interval_ms));
    let deadline = if settings.run_seconds == 0 {
        never::<Instant>()
    } else {
        after(Duration::from_secs(settings.run_seconds))
    };
    loop {
        select! {
            recv(ticker) -> _ => report(&state),
            recv(deadline) -> _ => break,
        }
    }

    drop(shutdown_tx);
    let tx = producer
        .join()
        .map_err(|_| anyhow!("producer thread panicked"))?;
    let rx = consumer
        .join()
        .map_err(|_| anyhow!("consumer thread panicked"))?;

    let diag = state.diagnostics_snapshot();
    let diag_json = serde_json::to_string(&diag).context("failed to serialize diagnostics")?;
    debug!(diagnostics = %diag_json, "final diagnostics");

    let mut queue = tx
        .rejoin(rx)
        .map_err(|_| anyhow!("queue halves did not rejoin"))?;
    let stats = queue.stats();
    info!(
        frames_pushed = stats.frames_pushed,
        frames_pulled = stats.frames_pulled,
        frames_left = queue.available_read(),
        rendered = diag.quanta_rendered,
        starved = diag.quanta_starved,
        dropped = diag.blocks_dropped,
        "FreeQueue stopped"
    );
    queue.reset();
    Ok(())
}
