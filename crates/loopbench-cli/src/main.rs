//! `loopbench` — sustained bandwidth profiling of a streaming accelerator.
//!
//! Sweeps circular-buffer sizes in a doubling loop, drives repeated
//! loopback transaction rounds per size, and writes one JSON stats file
//! per configuration plus a final bandwidth report.
//!
//! ```text
//! USAGE:
//!   loopbench                                 One 4096-element configuration
//!   loopbench -m 1024 -M 65536 -r 200         Sweep 1K..64K, 200 rounds each
//!   loopbench -w 4 -R false                   4 port pairs, fixed cursors
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use loopbench_device::{BuildMode, DeviceSession, SessionConfig, SoftwareQueue};
use loopbench_tester::{kernel_name, LoopbackTester, TesterConfig};

const PROGRESS_BAR_WIDTH: usize = 40;
/// Dump stats whenever progress has advanced by at least this fraction.
const FLUSH_STEP: f64 = 0.05;

#[derive(Parser)]
#[command(
    name = "loopbench",
    about = "Streaming-DMA loopback bandwidth profiler",
    version
)]
struct Cli {
    /// Number of repeated rounds per buffer size configuration.
    #[arg(short, long, default_value_t = 1)]
    repeats: u64,

    /// Minimum buffer size in elements (should be a power of two).
    #[arg(short = 'm', long, default_value_t = 4096)]
    min_buffer: usize,

    /// Maximum buffer size in elements (should be a power of two).
    #[arg(short = 'M', long, default_value_t = 4096)]
    max_buffer: usize,

    /// Statistics file prefix for each buffer size between min and max.
    #[arg(short, long, default_value = "stats_")]
    prefix: String,

    /// Randomize the head and tail cursors in each transfer.
    #[arg(short = 'R', long, default_value_t = true, action = clap::ArgAction::Set)]
    randomize: bool,

    /// Number of parallel input/output port pairs.
    #[arg(short, long, default_value_t = 1)]
    width: usize,

    /// Directory searched for the compiled kernel artifact.
    #[arg(long, default_value = "xclbin")]
    artifact_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    print_options(&cli);

    if !cli.min_buffer.is_power_of_two() || !cli.max_buffer.is_power_of_two() {
        tracing::warn!("buffer sizes should be powers of two; the sweep doubles from min");
    }
    anyhow::ensure!(
        cli.min_buffer <= cli.max_buffer,
        "min-buffer {} exceeds max-buffer {}",
        cli.min_buffer,
        cli.max_buffer
    );

    let emulation = std::env::var("XCL_EMULATION_MODE").ok();
    let mode = BuildMode::from_indicator(emulation.as_deref())
        .context("reading XCL_EMULATION_MODE")?;
    let kernel = kernel_name(cli.width);

    let mut buffer = cli.min_buffer;
    while buffer <= cli.max_buffer {
        run_configuration(&cli, &kernel, mode, buffer)
            .with_context(|| format!("buffer size {buffer}"))?;
        let Some(next) = buffer.checked_mul(2) else {
            break;
        };
        buffer = next;
    }
    Ok(())
}

fn run_configuration(cli: &Cli, kernel: &str, mode: BuildMode, buffer: usize) -> Result<()> {
    println!("Starting the test with buffer size {buffer} for {kernel}");

    let session = DeviceSession::new(
        Box::new(SoftwareQueue::new()),
        &SessionConfig {
            kernel_name: kernel.to_string(),
            search_dir: cli.artifact_dir.clone(),
            mode,
        },
    )
    .context("device session setup")?;

    let mut tester = LoopbackTester::new(session, &TesterConfig::new(cli.width, buffer))
        .context("tester setup")?;

    let stats_file = PathBuf::from(format!("{}{kernel}_{buffer}.json", cli.prefix));
    let mut flushed_at = 0.0_f64;

    for c in 0..cli.repeats {
        tester
            .run_round(cli.randomize)
            .with_context(|| format!("round {c}"))?;

        #[allow(clippy::cast_precision_loss)]
        let progress = c as f64 / cli.repeats as f64;
        if progress - flushed_at >= FLUSH_STEP {
            progress_bar(progress);
            // Best-effort periodic flush; a crash later still leaves a
            // usable partial document.
            tester.dump_stats(&stats_file).context("periodic stats dump")?;
            flushed_at = progress;
        }
    }
    progress_bar(1.0);
    println!();
    tester.dump_stats(&stats_file).context("final stats dump")?;
    println!("Stats written to {}", stats_file.display());

    print_report(&tester);
    Ok(())
}

fn print_options(cli: &Cli) {
    println!("=================== Options =================================");
    println!("randomize: {}", cli.randomize);
    println!("width: {}", cli.width);
    println!("min_buffer: {}", cli.min_buffer);
    println!("max_buffer: {}", cli.max_buffer);
    println!("prefix: {}", cli.prefix);
    println!("repeats: {}", cli.repeats);
    println!("-------------------------------------------------------------");
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn progress_bar(progress: f64) {
    let pos = (progress * PROGRESS_BAR_WIDTH as f64) as usize;
    print!("[");
    for i in 0..PROGRESS_BAR_WIDTH {
        if i < pos {
            print!("=");
        } else if i == pos {
            print!(">");
        } else {
            print!(" ");
        }
    }
    print!("] {} %\r", (progress * 100.0) as u32);
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn print_report(tester: &LoopbackTester) {
    let totals = tester.totals();
    println!("Bandwidth report ({} rounds):", totals.rounds());
    print_rate("Kernel", totals.kernel_bandwidth());
    print_rate("Write ", totals.write_bandwidth());
    print_rate("Read  ", totals.read_bandwidth());
    match totals.size_read_bandwidth() {
        Some(rate) => println!("Size  : {:9.3} KiB/s", rate * 1024.0),
        None => println!("Size  :       n/a"),
    }
}

fn print_rate(label: &str, rate: Option<f64>) {
    match rate {
        Some(rate) => println!("{label}: {rate:9.3} MiB/s"),
        None => println!("{label}:       n/a"),
    }
}
