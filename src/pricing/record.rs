//! The key-value pricing record kept for each rental.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::PricingConfig;
use crate::rental::Rental;
use crate::vehicle::{Vehicle, VehicleKind};

pub const DISTANCE_NARROW: &str = "DISTANCE_NARROW";
pub const DISTANCE_WIDE: &str = "DISTANCE_WIDE";
pub const DISCOUNT: &str = "DISCOUNT";
pub const DISCOUNT_PROM: &str = "DISCOUNT_PROM";
pub const CAR_UNIT_PRICE: &str = "CAR_UNIT_PRICE";
pub const BIKE_UNIT_PRICE: &str = "BIKE_UNIT_PRICE";
pub const SCOOTER_UNIT_PRICE: &str = "SCOOTER_UNIT_PRICE";
pub const BILL_PATH: &str = "BILL_PATH";

pub fn unit_price_key(kind: &VehicleKind) -> &'static str {
    match kind {
        VehicleKind::Car { .. } => CAR_UNIT_PRICE,
        VehicleKind::Bike { .. } => BIKE_UNIT_PRICE,
        VehicleKind::Scooter { .. } => SCOOTER_UNIT_PRICE,
    }
}

pub fn distance_key(narrow: bool) -> &'static str {
    if narrow { DISTANCE_NARROW } else { DISTANCE_WIDE }
}

/// String keys to string values, persisted as a flat JSON object.
///
/// Values are kept as written and parsed only at settlement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingRecord {
    entries: BTreeMap<String, String>,
}

impl PricingRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Copies every entry of `other` over this record; `other` wins on conflicts.
    pub fn overlay(&mut self, other: &PricingRecord) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collects every pricing input a rental needs at settlement.
    pub fn prepare(
        rental: &Rental,
        vehicle: &Vehicle,
        pricing: &PricingConfig,
        bills_dir: &Path,
    ) -> Self {
        let narrow = rental.is_narrow();
        let multiplier = if narrow {
            pricing.distance_narrow
        } else {
            pricing.distance_wide
        };
        let bill_path = bills_dir.join(format!("{}.csv", rental.file_stem()));

        PricingRecord::new()
            .with(distance_key(narrow), multiplier)
            .with(DISCOUNT, pricing.discount)
            .with(DISCOUNT_PROM, pricing.discount_prom)
            .with(unit_price_key(&vehicle.kind), pricing.unit_price_for(vehicle))
            .with(BILL_PATH, bill_path.display())
    }
}
