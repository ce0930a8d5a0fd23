//! measure_sync command-line entry point.

use anyhow::Context;
use clap::Parser;
use measure_sync::acquisition::simulated::SimulatedBoard;
use measure_sync::config::ExperimentConfig;
use measure_sync::orchestrator::{ExperimentOrchestrator, ExperimentTiming};
use measure_sync::recording::DEFAULT_OUTPUT_ROOT;
use measure_sync::stimulator::serial::SerialStimulator;
use measure_sync::stimulator::LinkTiming;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronized EEG recording during stimulator parameter sweeps")]
struct Cli {
    /// Measurement configuration (sweep ranges and timing)
    #[arg(short = 'm', long = "measureconf")]
    measure: PathBuf,

    /// Device configuration (EEG board and stimulator port)
    #[arg(short = 'd', long = "deviceconf")]
    device: PathBuf,

    /// Increase log verbosity (default info, -v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory receiving recordings and the metadata record
    #[arg(short, long, default_value = DEFAULT_OUTPUT_ROOT)]
    output_dir: PathBuf,

    /// Abort if the stimulator has not appeared after this many seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,
}

/// Filter directive for a `-v` count. Progress lines are `info`, so they show
/// without any flag.
fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level(verbose)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ExperimentConfig::load(&cli.measure, &cli.device)
        .context("Failed to load configuration")?;

    let device = &config.device;
    let board = SimulatedBoard::new(device.board, device.board_params());
    let stimulator = SerialStimulator::new(&device.stimulator_port, LinkTiming::default());

    let timing = ExperimentTiming {
        connect_deadline: cli.connect_timeout.map(Duration::from_secs),
        ..ExperimentTiming::default()
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping run");
                ctrl_c.cancel();
            }
            Err(e) => error!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let summary = ExperimentOrchestrator::new(config, board, stimulator, &cli.output_dir)
        .with_timing(timing)
        .with_cancellation(cancel)
        .run()
        .await?;

    info!(
        "Recorded {} condition(s) into '{}'",
        summary.recordings.len(),
        cli.output_dir.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
