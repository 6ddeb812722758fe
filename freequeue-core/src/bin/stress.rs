fn main() {
    if let Err(e) = run() {
        eprintln!("stress run failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use freequeue_core::{FreeQueue, StatsSnapshot, RENDER_QUANTUM_FRAMES};
    use serde::Serialize;
    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Args {
        capacity: usize,
        channels: usize,
        block: usize,
        blocks: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        capacity: usize,
        channels: usize,
        block_frames: usize,
        blocks: usize,
        elapsed_ms: f64,
        frames_per_sec: f64,
        p50_push_wait_us: f64,
        p95_push_wait_us: f64,
        p50_pull_wait_us: f64,
        p95_pull_wait_us: f64,
        corrupt_frames: usize,
        stats: StatsSnapshot,
    }

    fn parse_usize(flag: &str, value: Option<String>) -> Result<usize, String> {
        let Some(v) = value else {
            return Err(format!("missing value for {flag}"));
        };
        v.parse::<usize>()
            .map_err(|_| format!("invalid value for {flag}"))
    }

    fn parse_args() -> Result<Args, String> {
        let mut capacity = RENDER_QUANTUM_FRAMES * 16;
        let mut channels = 2;
        let mut block = RENDER_QUANTUM_FRAMES;
        let mut blocks = 100_000;
        let mut output: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--capacity" => capacity = parse_usize("--capacity", it.next())?,
                "--channels" => channels = parse_usize("--channels", it.next())?,
                "--block" => block = parse_usize("--block", it.next())?.max(1),
                "--blocks" => blocks = parse_usize("--blocks", it.next())?.max(1),
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p freequeue-core --release --bin stress -- \\
  [--capacity <frames>] [--channels <n>] [--block <frames>] [--blocks <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        if block > capacity {
            return Err(format!(
                "--block ({block}) must not exceed --capacity ({capacity})"
            ));
        }
        Ok(Args {
            capacity,
            channels,
            block,
            blocks,
            output,
        })
    }

    fn sample(frame: usize, channel: usize) -> f32 {
        // Wrap to stay exactly representable in f32.
        ((frame % (1 << 20)) as f32) + channel as f32 * 0.5
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn wait_us(started: Instant) -> f64 {
        started.elapsed().as_secs_f64() * 1_000_000.0
    }

    let args = parse_args()?;
    let queue = FreeQueue::new(args.capacity, args.channels).map_err(|e| e.to_string())?;
    let (mut tx, mut rx) = queue.split();

    println!(
        "Running FreeQueue stress: capacity={} channels={} block={} blocks={}",
        args.capacity, args.channels, args.block, args.blocks
    );

    let (channels, block, blocks) = (args.channels, args.block, args.blocks);
    let started = Instant::now();

    let producer = thread::spawn(move || {
        let mut buf = vec![vec![0.0f32; block]; channels];
        let mut waits = Vec::with_capacity(blocks);
        for n in 0..blocks {
            for (ch, lane) in buf.iter_mut().enumerate() {
                for (i, s) in lane.iter_mut().enumerate() {
                    *s = sample(n * block + i, ch);
                }
            }
            let t = Instant::now();
            while !tx.push(&buf, block) {
                thread::yield_now();
            }
            waits.push(wait_us(t));
        }
        (waits, tx)
    });

    let consumer = thread::spawn(move || {
        let mut buf = vec![vec![0.0f32; block]; channels];
        let mut waits = Vec::with_capacity(blocks);
        let mut corrupt = 0usize;
        for n in 0..blocks {
            let t = Instant::now();
            while !rx.pull(&mut buf, block) {
                thread::yield_now();
            }
            waits.push(wait_us(t));
            for (ch, lane) in buf.iter().enumerate() {
                corrupt += lane
                    .iter()
                    .enumerate()
                    .filter(|&(i, &s)| s != sample(n * block + i, ch))
                    .count();
            }
        }
        (waits, corrupt, rx)
    });

    let (push_waits, tx) = producer
        .join()
        .map_err(|_| "producer thread panicked".to_string())?;
    let (pull_waits, corrupt_frames, rx) = consumer
        .join()
        .map_err(|_| "consumer thread panicked".to_string())?;
    let elapsed = started.elapsed().max(Duration::from_nanos(1));

    let stats = tx.stats();
    let queue = tx
        .rejoin(rx)
        .map_err(|_| "split halves did not rejoin".to_string())?;
    if queue.available_read() != 0 {
        return Err(format!(
            "{} frames left in the ring after the run",
            queue.available_read()
        ));
    }

    let summary = Summary {
        capacity: args.capacity,
        channels,
        block_frames: block,
        blocks,
        elapsed_ms: elapsed.as_secs_f64() * 1000.0,
        frames_per_sec: stats.frames_pulled as f64 / elapsed.as_secs_f64(),
        p50_push_wait_us: percentile(&push_waits, 0.50),
        p95_push_wait_us: percentile(&push_waits, 0.95),
        p50_pull_wait_us: percentile(&pull_waits, 0.50),
        p95_pull_wait_us: percentile(&pull_waits, 0.95),
        corrupt_frames,
        stats,
    };

    println!(
        "Done. frames={} elapsed={:.1}ms throughput={:.0} frames/s corrupt={}",
        summary.stats.frames_pulled, summary.elapsed_ms, summary.frames_per_sec, corrupt_frames
    );

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote stress report: {}", out.display());
    } else {
        println!("{json}");
    }

    if corrupt_frames > 0 {
        return Err(format!("{corrupt_frames} samples arrived corrupted"));
    }
    Ok(())
}
