//! haarlite-bench: CLI tool for running Haar cascades over images.
//!
//! Loads a cascade description and an image, then either scans the
//! image at multiple scales (the default) or classifies the whole image
//! as a single window. Useful for:
//!
//! - Checking that a converted cascade file loads and round-trips
//! - Measuring per-level scan durations
//! - Seeing how many windows each stage rejects
//! - Tuning the scan step and pyramid scale
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin haarlite-bench -- [OPTIONS] <CASCADE_PATH> <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=debug` for per-level progress from the library.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use haarlite_cascade::diagnostics::{Clock, ScanDiagnostics};
use haarlite_cascade::{Cascade, Gray8Image, ScanConfig};

/// Fixed-point Haar cascade scanner and diagnostics.
///
/// Scans an image with a cascade and prints per-level timing, window
/// counts and stage rejection statistics.
#[derive(Parser)]
#[command(name = "haarlite-bench", version)]
struct Cli {
    /// Path to the cascade description text file.
    cascade_path: PathBuf,

    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Window stride in pixels.
    #[arg(
        long,
        default_value_t = ScanConfig::DEFAULT_STEP,
        value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..),
    )]
    step: u32,

    /// Per-level shrink factor in 1/256 units (320 = 1.25x).
    #[arg(
        long,
        default_value_t = ScanConfig::DEFAULT_SCALE_STEP,
        value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(257..),
    )]
    scale_step: u32,

    /// Maximum number of pyramid levels.
    #[arg(
        long,
        default_value_t = ScanConfig::DEFAULT_MAX_LEVELS,
        value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..),
    )]
    max_levels: u32,

    /// Full scan config as a JSON string.
    ///
    /// When provided, `--step`, `--scale-step` and `--max-levels` are
    /// ignored. The JSON must be a valid `ScanConfig` serialization;
    /// missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Classify the whole image as one window instead of scanning.
    ///
    /// The image is shrunk to the cascade window size first and every
    /// stage outcome is printed.
    #[arg(long)]
    window: bool,

    /// Write the cascade back out as text to this path.
    #[arg(long)]
    write_cascade: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..),
    )]
    runs: usize,

    /// Output results as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Build a [`ScanConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and the
/// individual flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<ScanConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        ScanConfig {
            step: cli.step,
            scale_step: cli.scale_step,
            max_levels: cli.max_levels,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_cascade(cli: &Cli) -> Result<Cascade, String> {
    let text = std::fs::read_to_string(&cli.cascade_path)
        .map_err(|e| format!("Error reading {}: {e}", cli.cascade_path.display()))?;
    text.parse()
        .map_err(|e| format!("Error loading {}: {e}", cli.cascade_path.display()))
}

fn load_image(cli: &Cli) -> Result<Gray8Image, String> {
    let bytes = std::fs::read(&cli.image_path)
        .map_err(|e| format!("Error reading {}: {e}", cli.image_path.display()))?;
    eprintln!(
        "Image: {} ({} bytes)",
        cli.image_path.display(),
        bytes.len(),
    );
    Gray8Image::decode(&bytes)
        .map_err(|e| format!("Error decoding {}: {e}", cli.image_path.display()))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let cascade = load_cascade(cli)?;
    eprintln!(
        "Cascade: {} (window {}, {} stages, {} stumps)",
        cli.cascade_path.display(),
        cascade.window(),
        cascade.stages().len(),
        cascade.stump_count(),
    );

    if let Some(ref path) = cli.write_cascade {
        let text = haarlite_cascade::to_text(&cascade).map_err(|e| e.to_string())?;
        std::fs::write(path, &text)
            .map_err(|e| format!("Error writing cascade to {}: {e}", path.display()))?;
        eprintln!("Cascade written to {} ({} bytes)", path.display(), text.len());
    }

    let image = load_image(cli)?;
    eprintln!("Decoded: {}", image.dimensions());

    if cli.window {
        return classify_window(cli, &cascade, &image);
    }

    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (detections, diagnostics) =
            haarlite_cascade::detect_with_diagnostics(&cascade, &image, &config, &StdClock)
                .map_err(|e| format!("Scan error: {e}"))?;

        if cli.json {
            let output = serde_json::json!({
                "detections": detections,
                "diagnostics": diagnostics,
            });
            let json = serde_json::to_string_pretty(&output)
                .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            println!("{}", diagnostics.report());
            if run == 0 {
                println!();
                for d in &detections {
                    println!(
                        "detection x={} y={} {}x{} level={}",
                        d.x, d.y, d.width, d.height, d.level,
                    );
                }
            }
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    Ok(())
}

/// Shrink the whole image to the cascade window and print every stage
/// outcome.
fn classify_window(cli: &Cli, cascade: &Cascade, image: &Gray8Image) -> Result<(), String> {
    let window = cascade.window();
    let input = if image.dimensions() == window {
        image.clone()
    } else {
        image
            .shrink_to(window.width, window.height)
            .map_err(|e| format!("Cannot fit image to the cascade window: {e}"))?
    };

    let evaluation = cascade
        .evaluate_traced(&input)
        .map_err(|e| format!("Evaluation error: {e}"))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&evaluation)
            .map_err(|e| format!("Error serializing evaluation: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    println!("Std-dev (x256): {}", evaluation.std_dev);
    println!("{:<8} {:>12} {:>12}  Result", "Stage", "Sum", "Threshold");
    println!("{}", "-".repeat(44));
    for outcome in &evaluation.stages {
        let threshold = cascade.stages()[outcome.stage].threshold();
        let result = if outcome.passed { "pass" } else { "reject" };
        println!("{:<8} {:>12} {threshold:>12}  {result}", outcome.stage, outcome.sum);
    }
    println!();
    println!(
        "{} after {} of {} stages",
        if evaluation.accepted { "ACCEPTED" } else { "REJECTED" },
        evaluation.stages_evaluated(),
        cascade.stages().len(),
    );
    Ok(())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[ScanDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

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

    // Per-level means.
    println!();
    println!("{:<8} {:>12}", "Level", "Mean (ms)");
    println!("{}", "-".repeat(24));

    let level_count = all_diagnostics.iter().map(|d| d.levels.len()).max().unwrap_or(0);
    for index in 0..level_count {
        let level_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(|d| d.levels.get(index))
            .map(|level| level.duration.as_secs_f64() * 1000.0)
            .collect();

        if level_durations.is_empty() {
            continue;
        }

        let level_mean = level_durations.iter().sum::<f64>() / level_durations.len() as f64;
        println!("{index:<8} {level_mean:>10.3}ms");
    }
}
