//! Command-line entry point for raster_daq.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use raster_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use raster_daq::hardware::SimulatedBeamline;
use raster_daq::poll::CancelHandle;
use raster_daq::scan::{ChannelNames, ScanOrchestrator};

/// Row-synchronized raster scan with a mapping detector.
#[derive(Parser, Debug)]
#[command(name = "raster_daq", version, about)]
struct Cli {
    /// Settings file (TOML, default `config/scan.toml`); `RASTERDAQ_*` variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full raster against the simulated beamline
    Run {
        /// Write the scan report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Validate settings and list the channels a scan would bind
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load()
            .with_context(|| format!("loading settings from {}", DEFAULT_CONFIG_PATH))?,
    };
    raster_daq::logging::init(&settings.application).context("initialising logging")?;
    info!(app = %settings.application.name, "Starting");

    match cli.command {
        Commands::Run { report } => run(settings, report).await,
        Commands::Check => {
            check(&settings);
            Ok(())
        }
    }
}

async fn run(settings: Settings, report_path: Option<PathBuf>) -> Result<()> {
    let beamline = Arc::new(SimulatedBeamline::from_settings(&settings));
    let cancel = Arc::new(CancelHandle::new());

    let orchestrator = ScanOrchestrator::new(beamline, settings).with_cancel(cancel.token());

    let interrupt = {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping scan");
                cancel.cancel();
            }
        })
    };

    let outcome = orchestrator.run().await;
    interrupt.abort();
    if cancel.is_cancelled() {
        warn!("Scan stopped by operator");
    }
    let report = outcome.context("scan failed")?;

    for file in &report.capture_files {
        println!(
            "row {:>4}  file #{:<5} {}",
            file.row_index, file.file_number, file.file_name
        );
    }

    if let Some(path) = report_path {
        let mut out = BufWriter::new(
            File::create(&path).with_context(|| format!("creating {}", path.display()))?,
        );
        serde_json::to_writer_pretty(&mut out, &report).context("writing scan report")?;
        out.flush().context("flushing scan report")?;
        info!(path = %path.display(), "Scan report written");
    }

    Ok(())
}

fn check(settings: &Settings) {
    let names = ChannelNames::from_beamline(&settings.beamline);
    info!(channels = names.all().len(), "Settings valid");
    for name in names.all() {
        println!("{}", name);
    }
}
