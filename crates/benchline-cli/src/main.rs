//! Station runner for the benchline power test bench.
//!
//! Loads a station file, connects the measuring device and runs one
//! inspection session, printing every progress event to stdout as one JSON
//! document per line. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! benchline --config station.toml check
//! benchline --config station.toml identify
//! benchline --config station.toml run --barcode SN-0001 --model PSU-200
//! benchline --config station.toml run --barcode SN-0001 --model PSU-200 --emulate
//! ```
//!
//! `RUST_LOG` selects the log level (default `info`). Ctrl+C aborts the
//! running session; the partial session is still stored.

use anyhow::{Context, Result, bail};
use benchline_core::{DeviceId, SessionOutcome};
use benchline_hardware::mock::{MockInstrumentHandle, MockOpener};
use benchline_hardware::transport::SerialOpener;
use benchline_hardware::{ConnectionManager, Instrument, TransportOpener};
use benchline_protocol::Identity;
use benchline_sequencer::collaborators::{JsonLinesStore, MemoryStore, SessionStore};
use benchline_sequencer::{Event, EventKind, EventSubscriber, Orchestrator, StationConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "benchline")]
#[command(about = "Power test station runner", long_about = None)]
struct Cli {
    /// Station configuration file (TOML)
    #[arg(long, short)]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the station file and list its models
    Check,

    /// Connect to the measuring device and print its identity
    Identify {
        /// Talk to the built-in emulator instead of the serial port
        #[arg(long)]
        emulate: bool,
    },

    /// Run one inspection session
    Run {
        /// Barcode of the unit under test
        #[arg(long)]
        barcode: String,

        /// Inspection model id
        #[arg(long)]
        model: String,

        /// Talk to the built-in emulator instead of the serial port
        #[arg(long)]
        emulate: bool,

        /// Append the finished session to this JSON-lines file
        /// (overrides `sequencer.results_path`)
        #[arg(long)]
        results: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = StationConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Check => check(&config),
        Commands::Identify { emulate } => identify(&config, emulate).await,
        Commands::Run {
            barcode,
            model,
            emulate,
            results,
        } => run(&config, barcode, model, emulate, results).await,
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check(config: &StationConfig) -> Result<()> {
    for device in &config.devices {
        println!(
            "device {} ({}) on {} at {} baud",
            device.id, device.role, device.settings.port, device.settings.baud_rate
        );
    }
    for model in &config.models {
        let names: Vec<&str> = model.phases.iter().map(|p| p.name.as_str()).collect();
        println!("model {}: {}", model.id, names.join(" -> "));
    }
    Ok(())
}

/// Manager for the station, with the measuring device connected and
/// identified.
async fn connect(
    config: &StationConfig,
    emulate: bool,
) -> Result<(ConnectionManager, DeviceId, Identity)> {
    let Some(entry) = config.measuring_device() else {
        bail!(
            "no device with role '{}' in the station file",
            config.sequencer.device_role
        );
    };

    let opener: Arc<dyn TransportOpener> = if emulate {
        info!("Emulating the analyzer on {}", entry.settings.port);
        let analyzer = MockInstrumentHandle::new();
        Arc::new(MockOpener::new().with_instrument(entry.settings.port.clone(), analyzer))
    } else {
        Arc::new(SerialOpener)
    };

    let manager = ConnectionManager::new(config.manager_config(), opener);
    manager
        .connect(&entry.id, entry.settings.clone())
        .await
        .with_context(|| format!("connecting {}", entry.id))?;

    let identity = manager
        .instrument(&entry.id)
        .identify()
        .await
        .with_context(|| format!("identifying {}", entry.id))?;
    info!(
        "{} is {} {} (serial {}, firmware {})",
        entry.id,
        identity.manufacturer,
        identity.model,
        identity.serial_number,
        identity.firmware_version
    );

    Ok((manager, entry.id.clone(), identity))
}

async fn identify(config: &StationConfig, emulate: bool) -> Result<()> {
    let (manager, _, identity) = connect(config, emulate).await?;
    manager.shutdown().await;

    println!(
        "{},{},{},{}",
        identity.manufacturer, identity.model, identity.serial_number, identity.firmware_version
    );
    Ok(())
}

async fn run(
    config: &StationConfig,
    barcode: String,
    model: String,
    emulate: bool,
    results: Option<PathBuf>,
) -> Result<()> {
    let (manager, _, _) = connect(config, emulate).await?;

    let catalog = Arc::new(config.catalog());
    let results = results.or_else(|| config.sequencer.results_path.clone());
    let store: Arc<dyn SessionStore> = match results {
        Some(path) => {
            info!("Storing sessions in {}", path.display());
            Arc::new(JsonLinesStore::new(path))
        }
        None => Arc::new(MemoryStore::new()),
    };

    let (orchestrator, mut events) = Orchestrator::new(
        manager.clone(),
        catalog.clone(),
        catalog,
        store,
        config.sequencer.clone(),
    );

    let outcome = match orchestrator.start_session(barcode, model).await {
        Ok(_) => follow(&orchestrator, &mut events).await,
        Err(e) => Err(e.into()),
    };
    manager.shutdown().await;

    match outcome? {
        Some(SessionOutcome::Completed) => Ok(()),
        Some(outcome) => bail!("session ended: {outcome}"),
        None => bail!("event stream closed before the session ended"),
    }
}

/// Print events until the session is over; Ctrl+C aborts it.
async fn follow(
    orchestrator: &Orchestrator,
    events: &mut EventSubscriber,
) -> Result<Option<SessionOutcome>> {
    let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;
    let mut outcome = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event)?;
                if event.is_terminal() {
                    outcome = Some(outcome_of(&event));
                    break;
                }
            }
            signal = &mut interrupt, if !interrupted => {
                signal.context("listening for Ctrl+C")?;
                interrupted = true;
                warn!("Interrupted, aborting session");
                if let Err(e) = orchestrator.abort_session() {
                    warn!("Abort failed: {}", e);
                }
            }
        }
    }

    // Storage failures are reported after the terminal event
    orchestrator.wait_until_idle().await;
    while let Some(event) = events.try_recv() {
        print_event(&event)?;
    }
    Ok(outcome)
}

fn print_event(event: &Event) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn outcome_of(event: &Event) -> SessionOutcome {
    match &event.kind {
        EventKind::SessionComplete { session } => session.outcome,
        EventKind::SessionAborted { .. } => SessionOutcome::Aborted,
        _ => SessionOutcome::Error,
    }
}
