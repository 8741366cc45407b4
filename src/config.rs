//! Simulation configuration.
//!
//! Stored as a JSON object on disk; every field is optional:
//! ```json
//! {
//!   "rentals_file": "data/rentals.csv",
//!   "bills_dir": "out/bills",
//!   "time_unit_ms": 250,
//!   "pricing": { "distance_wide": 1.5, "discount": 10 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::vehicle::{Vehicle, VehicleKind};

/// How long a malfunction marker stays on the grid, in time units.
pub const MARKER_TIME_UNITS: u32 = 2;

/// Pause after a batch settles before the grid is cleared, in time units.
pub const QUIESCENCE_TIME_UNITS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub car_unit_price: Option<u32>,
    pub bike_unit_price: Option<u32>,
    pub scooter_unit_price: Option<u32>,
    pub distance_narrow: f64,
    pub distance_wide: f64,
    /// Loyalty discount, percent.
    pub discount: f64,
    /// Promotional discount, percent.
    pub discount_prom: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            car_unit_price: None,
            bike_unit_price: None,
            scooter_unit_price: None,
            distance_narrow: 1.0,
            distance_wide: 1.5,
            discount: 10.0,
            discount_prom: 5.0,
        }
    }
}

impl PricingConfig {
    /// Configured price for the vehicle's kind, falling back to its purchase price.
    pub fn unit_price_for(&self, vehicle: &Vehicle) -> u32 {
        let configured = match vehicle.kind {
            VehicleKind::Car { .. } => self.car_unit_price,
            VehicleKind::Bike { .. } => self.bike_unit_price,
            VehicleKind::Scooter { .. } => self.scooter_unit_price,
        };
        configured.unwrap_or(vehicle.purchase_price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub vehicles_file: PathBuf,
    pub rentals_file: PathBuf,
    pub records_dir: PathBuf,
    pub bills_dir: PathBuf,
    pub damaged_dir: PathBuf,
    pub time_unit_ms: u64,
    pub pricing: PricingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            vehicles_file: PathBuf::from("vehicles.csv"),
            rentals_file: PathBuf::from("rentals.csv"),
            records_dir: PathBuf::from("records"),
            bills_dir: PathBuf::from("bills"),
            damaged_dir: PathBuf::from("damaged"),
            time_unit_ms: 1000,
            pricing: PricingConfig::default(),
        }
    }
}

impl SimConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config '{}'", path.display()))?;
        Ok(config)
    }

    /// Like [`SimConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Places records, bills and damaged vehicles under one folder.
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.records_dir = dir.join("records");
        self.bills_dir = dir.join("bills");
        self.damaged_dir = dir.join("damaged");
        self
    }

    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    pub fn marker_ttl(&self) -> Duration {
        self.time_unit() * MARKER_TIME_UNITS
    }

    pub fn quiescence(&self) -> Duration {
        self.time_unit() * QUIESCENCE_TIME_UNITS
    }
}
