//! pindaq - xPIN diode pulse acquisition
//!
//! Command line frontend: runs one acquisition from a replay file or the
//! synthetic generator, prints live peak readings and stops on Ctrl+C or
//! when the source runs out of input.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use pindaq::saver::{SaveFormat, SeriesSelection};
use pindaq::supervisor::{RunOptions, RunSupervisor, SourceConfig};
use pindaq::AnalysisConfig;

#[derive(Parser, Debug)]
#[command(name = "pindaq", version, about = "xPIN diode pulse acquisition")]
struct Cli {
    /// Replay a recorded trace instead of acquiring from hardware
    #[arg(long, value_name = "FILE", conflicts_with = "synthetic")]
    replay: Option<PathBuf>,

    /// Generate a deterministic pulse train instead of acquiring
    #[arg(long)]
    synthetic: bool,

    /// Sampling frequency in Hz
    #[arg(long, default_value_t = pindaq::DEFAULT_SAMPLE_RATE)]
    freq: f64,

    /// Edge detection threshold in volts
    #[arg(long, default_value_t = 0.005)]
    threshold: f64,

    /// Peaks averaged per entry of the averaged series
    #[arg(long, default_value_t = 50)]
    average_count: usize,

    /// Log the run to a file with this base name
    #[arg(long, value_name = "BASE")]
    save: Option<String>,

    /// Log file format
    #[arg(long, value_enum, default_value_t = SaveFormat::Csv)]
    format: SaveFormat,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Persist every series, not just raw samples and peaks (HDF5 only)
    #[arg(long)]
    all_series: bool,

    /// Log the per-second sample rate while running
    #[arg(long)]
    monitor: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pindaq=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let source_config = if let Some(path) = cli.replay {
        SourceConfig::Replay(path)
    } else if cli.synthetic {
        SourceConfig::Synthetic { sample_limit: None }
    } else {
        // The NI host bridge is wired in by the embedding application
        bail!("no sample source: pass --replay FILE or --synthetic");
    };

    println!("pindaq v{} - xPIN diode pulse acquisition", pindaq::VERSION);
    println!();

    let supervisor = Arc::new(
        RunSupervisor::new(source_config, cli.log_dir, cli.freq).with_monitor(cli.monitor),
    );

    let options = RunOptions {
        save_name: cli.save,
        format: cli.format,
        selection: if cli.all_series {
            SeriesSelection::all()
        } else {
            SeriesSelection::default()
        },
        config: AnalysisConfig::new(cli.threshold, cli.average_count),
    };
    supervisor.start_run(options)?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    let handler_supervisor = Arc::clone(&supervisor);
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping run");
        handler_supervisor.stop_run();
        handler_running.store(false, Ordering::SeqCst);
    })?;

    println!("Acquisition started. Press Ctrl+C to stop.");
    println!();

    let mut last_line = String::new();
    while running.load(Ordering::SeqCst) && supervisor.is_acquiring() {
        if let Some(analyzer) = supervisor.analyzer() {
            let peaks = analyzer.processed().len();
            let line = match analyzer.processed().last() {
                Some(peak) => format!(
                    "Samples: {:>9} | Peaks: {:>7} | Last peak: {:>9.5} V | Irregular: {:>4}",
                    analyzer.ys().len(),
                    peaks,
                    peak.value,
                    analyzer.irregular_events()
                ),
                None => format!("Samples: {:>9} | no peaks yet", analyzer.ys().len()),
            };
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    if let Some(analyzer) = supervisor.analyzer() {
        println!();
        println!("Run summary:");
        println!("  samples   {}", analyzer.ys().len());
        println!("  peaks     {}", analyzer.processed().len());
        println!("  averaged  {}", analyzer.averaged().len());
        println!("  irregular {}", analyzer.irregular_events());
        if let Some(stamp) = analyzer.first_processed_timestamp() {
            println!("  first peak at {stamp}");
        }
    }

    supervisor.stop_run();
    println!("Done.");
    Ok(())
}
