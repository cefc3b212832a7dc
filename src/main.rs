//! Command-line entry point for the hydrophone scanner.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use hydroscan::config::Settings;
use hydroscan::core::{Axis, Digitizer, Position, Positioner};
use hydroscan::error::ScanError;
use hydroscan::instruments::{MockDigitizer, MockPositioner};
use hydroscan::motion::MotionCoordinator;
use hydroscan::ranging::AutoRanger;
use hydroscan::scan::{self, CancelToken, ScanPlan, ScanRunner};
use hydroscan::storage::ScanWriter;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hydroscan", about = "Hydrophone field scanner", version)]
struct Cli {
    /// Configuration file layered over config/default.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated instruments instead of real hardware.
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured scan and persist the results.
    Scan,
    /// Take one auto-ranged measurement at the current position.
    Measure,
    /// Jog one axis by a signed distance.
    Move {
        axis: Axis,
        /// Signed distance in millimetres.
        distance_mm: f64,
    },
}

/// Peak-to-peak amplitude of the simulated hydrophone signal.
const MOCK_AMPLITUDE_V: f64 = 0.8;

async fn build_instruments(
    settings: &Settings,
    mock: bool,
) -> Result<(Box<dyn Positioner>, Box<dyn Digitizer>)> {
    if mock {
        info!("using simulated instruments");
        return Ok((
            Box::new(MockPositioner::new()),
            Box::new(MockDigitizer::new(MOCK_AMPLITUDE_V).with_noise(0.02)),
        ));
    }

    #[cfg(feature = "instrument_serial")]
    {
        use hydroscan::adapters::SerialTransport;
        use hydroscan::instruments::{GantryController, SiglentScope};
        use std::time::Duration;

        let gantry_link = SerialTransport::open(
            &settings.hardware.gantry_port,
            settings.hardware.baud_rate,
            Duration::from_secs(30),
        )?;
        let scope_link = SerialTransport::open(
            &settings.hardware.scope_address,
            settings.hardware.baud_rate,
            Duration::from_secs(5),
        )?;
        let mut gantry =
            GantryController::new(Box::new(gantry_link), settings.hardware.steps_per_mm);
        gantry.initialize().await?;
        let mut scope = SiglentScope::new(Box::new(scope_link));
        scope.initialize().await?;
        Ok((Box::new(gantry), Box::new(scope)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = settings;
        bail!(
            "built without the 'instrument_serial' feature; \
             rebuild with --features instrument_serial or pass --mock"
        )
    }
}

async fn run_scan(settings: &Settings, mock: bool) -> Result<()> {
    let plan = ScanPlan::from_settings(settings, Position::ZERO)?;
    let (positioner, digitizer) = build_instruments(settings, mock).await?;
    let mut runner = ScanRunner::new(
        MotionCoordinator::new(positioner),
        AutoRanger::new(&settings.ranging_config()),
        digitizer,
    );

    let cancel = CancelToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current point then stopping");
            ctrl_c_token.cancel();
        }
    });

    let writer = ScanWriter::create(&settings.scan.base_path)?;
    let result = runner.run(&plan, &cancel).await;
    if let Err(e) = runner.shutdown().await {
        warn!("hardware release failed: {e}");
    }
    match result {
        Ok(outcome) => {
            writer.write_outcome(&outcome)?;
            info!(
                "scan complete: {} points ({} failed) written to {}",
                outcome.metadata.total_points,
                outcome.metadata.failed_points,
                writer.dir().display()
            );
        }
        Err(ScanError::Aborted { reason, records }) => {
            writer.write_partial(&records, &reason)?;
            warn!(
                "scan aborted ({reason}); {} partial records written to {}",
                records.len(),
                writer.dir().display()
            );
        }
        Err(other) => return Err(other.into()),
    }
    Ok(())
}

async fn run_measure(settings: &Settings, mock: bool) -> Result<()> {
    let (mut positioner, mut digitizer) = build_instruments(settings, mock).await?;
    let mut ranger = AutoRanger::new(&settings.ranging_config());
    let measurement = ranger.measure(digitizer.as_mut()).await;
    if let Err(e) = positioner.shutdown().await {
        warn!("hardware release failed: {e:#}");
    }
    if measurement.is_failed() {
        bail!("measurement failed at {} V/div", measurement.range);
    }
    println!(
        "positive peak: {:+.6} V\nnegative peak: {:+.6} V\npeak-to-peak:  {:.6} V\nrange:         {} V/div",
        measurement.positive_peak,
        measurement.negative_peak,
        measurement.peak_to_peak(),
        measurement.range
    );
    Ok(())
}

async fn run_move(settings: &Settings, mock: bool, axis: Axis, distance_mm: f64) -> Result<()> {
    let (positioner, _) = build_instruments(settings, mock).await?;
    let mut motion = MotionCoordinator::new(positioner);
    let result = scan::jog(&mut motion, axis, distance_mm).await;
    if let Err(e) = motion.shutdown().await {
        warn!("hardware release failed: {e}");
    }
    result.map_err(Into::into)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan => run_scan(&settings, cli.mock).await,
        Command::Measure => run_measure(&settings, cli.mock).await,
        Command::Move { axis, distance_mm } => {
            run_move(&settings, cli.mock, axis, distance_mm).await
        }
    }
}
