//! Settlement output: bills and serialized damaged vehicles.
//!
//! Each bill is a one-row CSV file; damaged vehicles are JSON files.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::grid::Cell;
use crate::vehicle::Vehicle;

/// The settled form of a rental, read by reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub rental_timestamp: String,
    pub driver_name: String,
    pub vehicle_id: String,
    pub unit_price: u32,
    pub start_location: String,
    pub finish_location: String,
    pub usage_duration_secs: u32,
    pub malfunction: bool,
    /// Set only when the rental broke down.
    pub malfunction_description: Option<String>,
    pub malfunction_at: Option<String>,
    pub promotion: bool,
    /// Loyalty discount, in currency units.
    pub discount: f64,
    /// Promotional discount, in currency units.
    pub promotion_discount: f64,
    pub total_price: f64,
    pub narrow_city: bool,
    pub settled_at: DateTime<Utc>,
}

pub fn location(cell: Cell) -> String {
    cell.to_string()
}

/// Logs a bill using Rust's debug pretty-print format.
pub fn print_pretty(bill: &Bill) {
    info!("{:#?}", bill);
}

/// Logs a bill as pretty-printed JSON.
pub fn print_json(bill: &Bill) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(bill)?);
    Ok(())
}

/// Writes `bill` to `path` as a header row plus one data row, replacing any
/// previous bill at that path.
pub fn write_bill(path: &Path, bill: &Bill) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    writer.serialize(bill)?;
    writer.flush()?;
    debug!(path = %path.display(), "Bill written");
    Ok(())
}

pub fn read_bill(path: &Path) -> Result<Bill> {
    let file = File::open(path).with_context(|| format!("Failed to open bill '{}'", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    match rdr.deserialize::<Bill>().next() {
        Some(record) => Ok(record?),
        None => anyhow::bail!("Bill '{}' has no data row", path.display()),
    }
}

/// Reads every bill in `dir`. Unreadable bills are logged and skipped.
pub fn load_bills(dir: &Path) -> Result<Vec<Bill>> {
    let mut bills = Vec::new();

    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list '{}'", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        match read_bill(&path) {
            Ok(bill) => bills.push(bill),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable bill"),
        }
    }

    bills.sort_by(|a, b| {
        a.rental_timestamp
            .cmp(&b.rental_timestamp)
            .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
    });
    Ok(bills)
}

/// Bills of rentals that broke down, in the order given.
pub fn malfunctions(bills: &[Bill]) -> Vec<&Bill> {
    bills.iter().filter(|b| b.malfunction).collect()
}

/// Serializes each vehicle to `<dir>/<vehicle id>.json`. Returns how many were written.
pub fn save_damaged<'a>(dir: &Path, vehicles: impl IntoIterator<Item = &'a Vehicle>) -> Result<usize> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create '{}'", dir.display()))?;
    let mut written = 0;
    for vehicle in vehicles {
        let path = dir.join(format!("{}.json", vehicle.id));
        fs::write(&path, serde_json::to_string_pretty(vehicle)?)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        written += 1;
    }
    Ok(written)
}

/// Reads back every serialized damaged vehicle in `dir`.
pub fn load_damaged(dir: &Path) -> Result<Vec<Vehicle>> {
    let mut vehicles = Vec::new();
    if !dir.exists() {
        return Ok(vehicles);
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| Ok(serde_json::from_str::<Vehicle>(&content)?));
        match parsed {
            Ok(vehicle) => vehicles.push(vehicle),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable vehicle"),
        }
    }

    vehicles.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(vehicles)
}
