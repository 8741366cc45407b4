//! Fleet vehicles and their battery rules.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Battery level after a charge.
pub const FULL_BATTERY: u8 = 100;

/// Battery never drains below this level during a ride.
pub const MIN_BATTERY: u8 = 5;

/// A vehicle handle shared between the scheduler and the one task driving it.
pub type SharedVehicle = Arc<Mutex<Vehicle>>;

/// Kind-specific attributes of a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleKind {
    Car {
        purchase_date: String,
        description: String,
    },
    Bike {
        range_per_charge: u32,
    },
    Scooter {
        max_speed: u32,
    },
}

impl VehicleKind {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleKind::Car { .. } => "car",
            VehicleKind::Bike { .. } => "bike",
            VehicleKind::Scooter { .. } => "scooter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub manufacturer: String,
    pub model: String,
    pub purchase_price: u32,
    #[serde(flatten)]
    pub kind: VehicleKind,
    pub battery: u8,
}

impl Vehicle {
    /// Creates a vehicle with a full battery.
    pub fn new(
        id: impl Into<String>,
        manufacturer: impl Into<String>,
        model: impl Into<String>,
        purchase_price: u32,
        kind: VehicleKind,
    ) -> Self {
        Self {
            id: id.into(),
            manufacturer: manufacturer.into(),
            model: model.into(),
            purchase_price,
            kind,
            battery: FULL_BATTERY,
        }
    }

    pub fn charge(&mut self) {
        self.battery = FULL_BATTERY;
    }

    /// Drains one unit of battery and returns the new level.
    ///
    /// The level is clamped at [`MIN_BATTERY`].
    pub fn drain(&mut self) -> u8 {
        self.battery = self.battery.saturating_sub(1).max(MIN_BATTERY);
        self.battery
    }

    pub fn has_passenger_capacity(&self) -> bool {
        matches!(self.kind, VehicleKind::Car { .. })
    }

    pub fn into_shared(self) -> SharedVehicle {
        Arc::new(Mutex::new(self))
    }
}
