//! CLI entry point for the fleet rental simulator.
//!
//! `run` simulates a rentals file against a vehicle fleet and settles every
//! rental into a bill; `bills` and `damaged` read the results back.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleet_sim::config::SimConfig;
use fleet_sim::grid::{ChannelObserver, GridEvent};
use fleet_sim::output::{load_bills, load_damaged, malfunctions, print_json, print_pretty};
use fleet_sim::simulation::Simulation;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Instrument, debug, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "fleet_sim")]
#[command(about = "Simulates and settles fleet rentals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation and write a bill for every rental
    Run {
        /// JSON config file (falls back to FLEET_CONFIG, then fleet.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Vehicles CSV, overriding the config
        #[arg(long)]
        vehicles: Option<PathBuf>,

        /// Rentals CSV, overriding the config
        #[arg(long)]
        rentals: Option<PathBuf>,

        /// Put records, bills and damaged vehicles under this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Print the bills in a directory
    Bills {
        #[arg(short, long, default_value = "bills")]
        dir: PathBuf,

        /// Print as JSON instead of debug format
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List vehicles serialized after a malfunction
    Damaged {
        #[arg(short, long, default_value = "damaged")]
        dir: PathBuf,
    },
    /// List every rental that broke down, with when and why
    Malfunctions {
        /// Directory holding the bills
        #[arg(short, long, default_value = "bills")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fleet_sim.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleet_sim.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            vehicles,
            rentals,
            output_dir,
        } => {
            let config_path = config
                .or_else(|| std::env::var_os("FLEET_CONFIG").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("fleet.json"));
            let mut sim_config = SimConfig::load_or_default(&config_path)?;
            if let Some(path) = vehicles {
                sim_config.vehicles_file = path;
            }
            if let Some(path) = rentals {
                sim_config.rentals_file = path;
            }
            if let Some(dir) = output_dir {
                sim_config = sim_config.with_output_dir(dir);
            }

            let (observer, mut events) = ChannelObserver::new();
            let renderer = tokio::spawn(
                async move {
                    while let Some(event) = events.recv().await {
                        log_event(&event);
                    }
                }
                .instrument(tracing::debug_span!("renderer")),
            );

            let summary = Simulation::new(sim_config)
                .with_observer(Arc::new(observer))
                .run()
                .await?;

            // The grid, and with it the event sender, is gone once the run returns.
            if let Err(e) = renderer.await {
                tracing::warn!(error = %e, "Renderer task failed");
            }

            info!(
                batches = summary.batches,
                rentals = summary.rentals,
                settled = summary.settled,
                failed = summary.failed,
                malfunctions = summary.malfunctions,
                damaged = summary.damaged_saved,
                revenue = summary.revenue,
                "Run complete"
            );
        }
        Commands::Bills { dir, json } => {
            let bills = load_bills(&dir)?;
            info!(count = bills.len(), dir = %dir.display(), "Bills loaded");
            for bill in &bills {
                if json {
                    print_json(bill)?;
                } else {
                    print_pretty(bill);
                }
            }
        }
        Commands::Damaged { dir } => {
            let vehicles = load_damaged(&dir)?;
            info!(count = vehicles.len(), dir = %dir.display(), "Damaged vehicles loaded");
            for vehicle in &vehicles {
                info!(
                    vehicle_id = %vehicle.id,
                    kind = vehicle.kind.label(),
                    manufacturer = %vehicle.manufacturer,
                    model = %vehicle.model,
                    battery = vehicle.battery,
                    passenger_capacity = vehicle.has_passenger_capacity(),
                    "Damaged vehicle"
                );
            }
        }
        Commands::Malfunctions { dir } => {
            let bills = load_bills(&dir)?;
            let broken = malfunctions(&bills);
            info!(count = broken.len(), dir = %dir.display(), "Malfunctions loaded");
            for bill in broken {
                info!(
                    vehicle_id = %bill.vehicle_id,
                    driver = %bill.driver_name,
                    at = bill.malfunction_at.as_deref().unwrap_or(&bill.rental_timestamp),
                    description = bill.malfunction_description.as_deref().unwrap_or_default(),
                    "Malfunction"
                );
            }
        }
    }

    Ok(())
}

fn log_event(event: &GridEvent) {
    match event {
        GridEvent::Moved {
            cell,
            vehicle_id,
            battery,
            from,
        } => debug!(%cell, %vehicle_id, battery, from = ?from, "Vehicle moved"),
        GridEvent::Marked {
            cell,
            label,
            expires_in,
        } => debug!(%cell, %label, expires_in_ms = expires_in.as_millis() as u64, "Marker placed"),
        GridEvent::Expired { cell, label } => debug!(%cell, %label, "Marker expired"),
        GridEvent::Cleared => debug!("Grid cleared"),
    }
}
