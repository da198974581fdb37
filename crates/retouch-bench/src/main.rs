//! retouch-bench: CLI tool for pipeline timing and scheduler simulation.
//!
//! Decodes an image file, runs the retouch pipeline with configurable
//! parameters, and prints per-stage diagnostics. Useful for:
//!
//! - Comparing nearest-neighbor and bilinear resampling cost
//! - Measuring how gamma and the edge filter scale with output size
//! - Simulating a slider drag through the scheduler and debouncer to see
//!   how many jobs are cancelled or discarded
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin retouch-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use retouch_pipeline::debounce::{DebounceStats, Debouncer};
use retouch_pipeline::diagnostics::{PipelineDiagnostics, SystemClock};
use retouch_pipeline::scheduler::StandardProcessor;
use retouch_pipeline::{
    CancellationToken, FilterKind, Frame, InterpolationMethod, JobScheduler, ParameterSnapshot,
    PixelBuffer, RunOutcome, SchedulerConfig, SchedulerStats,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Pipeline timing and interactive-scheduling diagnostics for retouch.
///
/// Runs resample, gamma and the optional edge filter on a given image
/// and prints per-stage timing.
#[derive(Parser)]
#[command(name = "retouch-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Resize factor applied to both axes.
    #[arg(long, default_value_t = ParameterSnapshot::DEFAULT_SCALE)]
    scale: f64,

    /// Gamma exponent (must be positive).
    #[arg(long, default_value_t = ParameterSnapshot::DEFAULT_GAMMA)]
    gamma: f64,

    /// Interpolation method.
    #[arg(long, value_enum, default_value_t = Interpolation::Bilinear)]
    interpolation: Interpolation,

    /// Post-gamma filter.
    #[arg(long, value_enum, default_value_t = Filter::None)]
    filter: Filter,

    /// Full parameter snapshot as a JSON string.
    ///
    /// When provided, the individual parameter flags are ignored.
    #[arg(long)]
    params_json: Option<String>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Size of the rayon thread pool (default: one per core).
    #[arg(long)]
    threads: Option<usize>,

    /// Simulate a slider drag of N steps through the scheduler instead
    /// of timing single runs.
    #[arg(long)]
    sweep: Option<u32>,

    /// Debounce window for `--sweep`, in milliseconds (0 disables).
    #[arg(long, default_value_t = SchedulerConfig::DEFAULT_DEBOUNCE.as_secs_f64() * 1000.0)]
    debounce_ms: f64,
}

/// Interpolation method selection.
#[derive(Clone, Copy, ValueEnum)]
enum Interpolation {
    /// Nearest source pixel (fastest, blocky).
    Nearest,
    /// Blend of the four surrounding pixels.
    Bilinear,
}

/// Filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// No filter.
    None,
    /// 5x5 edge-emphasis convolution.
    Edge,
}

/// Build a [`ParameterSnapshot`] from CLI arguments.
fn snapshot_from_cli(cli: &Cli) -> Result<ParameterSnapshot, String> {
    if let Some(ref json) = cli.params_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --params-json: {e}"));
    }

    Ok(ParameterSnapshot {
        scale: cli.scale,
        gamma: cli.gamma,
        interpolation: match cli.interpolation {
            Interpolation::Nearest => InterpolationMethod::NearestNeighbor,
            Interpolation::Bilinear => InterpolationMethod::Bilinear,
        },
        filter: match cli.filter {
            Filter::None => FilterKind::None,
            Filter::Edge => FilterKind::Edge,
        },
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads
        && let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
    {
        eprintln!("Error configuring thread pool: {e}");
        return ExitCode::FAILURE;
    }

    let snapshot = match snapshot_from_cli(&cli) {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let source = match retouch_pipeline::raster::decode(&image_bytes) {
        Ok(buffer) => buffer,
        Err(e) => {
            eprintln!("Pipeline error: {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes, {})",
        cli.image_path.display(),
        image_bytes.len(),
        source.dimensions(),
    );
    eprintln!("Parameters: {snapshot:#?}");
    eprintln!();

    if let Some(steps) = cli.sweep {
        return run_sweep(source, snapshot, steps, &cli);
    }

    eprintln!("Runs: {}", cli.runs);
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let outcome = retouch_pipeline::diagnostics::run_with_diagnostics(
            &source,
            &snapshot,
            &CancellationToken::new(),
            &SystemClock,
        );
        let diagnostics = match outcome {
            Ok(RunOutcome::Completed((_, diagnostics))) => diagnostics,
            Ok(RunOutcome::Cancelled) => {
                eprintln!("Run was cancelled");
                return ExitCode::FAILURE;
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if cli.json {
            match serde_json::to_string_pretty(&diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
        }
        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Result of a `--sweep` simulation.
#[derive(Serialize)]
struct SweepReport {
    steps: u32,
    debounce: Option<DebounceStats>,
    scheduler: SchedulerStats,
    last_frame_generation: Option<u64>,
    #[serde(with = "retouch_pipeline::diagnostics::duration_serde")]
    wall_time: Duration,
}

/// Drag the scale from the lower end of the UI range up to the target
/// scale in `steps` submissions, as fast as possible.
fn run_sweep(source: PixelBuffer, target: ParameterSnapshot, steps: u32, cli: &Cli) -> ExitCode {
    let config = SchedulerConfig {
        debounce: Duration::try_from_secs_f64(cli.debounce_ms / 1000.0).unwrap_or_default(),
        ..SchedulerConfig::default()
    };
    let (tx, frames) = mpsc::channel::<Frame>();
    let sink = move |frame: Frame| {
        let _ = tx.send(frame);
    };
    let scheduler = match JobScheduler::with_processor(source, &config, StandardProcessor, sink) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error starting scheduler: {e}");
            return ExitCode::FAILURE;
        }
    };

    let debouncer = if scheduler.config().debounce.is_zero() {
        None
    } else {
        match Debouncer::for_scheduler(&scheduler) {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("Error starting debouncer: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let start = Instant::now();
    let low = *ParameterSnapshot::SCALE_RANGE.start();
    for step in 1..=steps {
        let t = f64::from(step) / f64::from(steps);
        let snapshot = ParameterSnapshot {
            scale: retouch_pipeline::color::lerp(low, target.scale, t),
            ..target
        };
        let submitted = match debouncer {
            Some(ref d) => d.submit(snapshot),
            None => scheduler.submit(snapshot).map(drop),
        };
        if let Err(e) = submitted {
            eprintln!("Submit error: {e}");
            return ExitCode::FAILURE;
        }
    }

    let debounce = debouncer.map(Debouncer::finish);
    if !scheduler.wait_idle(Duration::from_secs(600)) {
        eprintln!("Scheduler did not become idle");
        return ExitCode::FAILURE;
    }
    let stats = scheduler.shutdown();
    let report = SweepReport {
        steps,
        debounce,
        scheduler: stats,
        last_frame_generation: frames.try_iter().last().map(|f| f.generation),
        wall_time: start.elapsed(),
    };

    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing sweep report: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_sweep_report(&report);
    }
    ExitCode::SUCCESS
}

fn print_sweep_report(report: &SweepReport) {
    println!("Sweep Report ({} steps)\n{}", report.steps, "=".repeat(60));
    if let Some(d) = report.debounce {
        println!("Debouncer: received={} forwarded={}", d.received, d.forwarded);
    }
    let s = report.scheduler;
    println!(
        "Scheduler: submitted={} delivered={} cancelled={} stale={} failed={}",
        s.submitted, s.delivered, s.cancelled, s.stale, s.failed,
    );
    match report.last_frame_generation {
        Some(generation) => println!("Last frame generation: {generation}"),
        None => println!("No frame delivered"),
    }
    println!("Wall time: {:.3}ms", report.wall_time.as_secs_f64() * 1000.0);
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Resample", |d| Some(d.resample.duration)),
        ("Gamma", |d| d.gamma.as_ref().map(|s| s.duration)),
        ("Edge Filter", |d| d.edge_filter.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
