//! Loads the vehicle catalog and the rental list from CSV.
//!
//! Bad rows never abort a load: each one is logged with its line number and
//! skipped.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::driver::DriverRegistry;
use crate::rental::{Malfunction, Rental, checked_cell};
use crate::vehicle::{Vehicle, VehicleKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindTag {
    #[serde(alias = "automobil")]
    Car,
    #[serde(alias = "bicikl")]
    Bike,
    #[serde(alias = "trotinet")]
    Scooter,
}

#[derive(Debug, Deserialize)]
struct VehicleRow {
    id: String,
    manufacturer: String,
    model: String,
    purchase_date: String,
    purchase_price: u32,
    range_per_charge: Option<u32>,
    max_speed: Option<u32>,
    description: String,
    kind: KindTag,
}

impl VehicleRow {
    fn into_vehicle(self) -> Vehicle {
        let kind = match self.kind {
            KindTag::Car => VehicleKind::Car {
                purchase_date: self.purchase_date,
                description: self.description,
            },
            KindTag::Bike => VehicleKind::Bike {
                range_per_charge: self.range_per_charge.unwrap_or(0),
            },
            KindTag::Scooter => VehicleKind::Scooter {
                max_speed: self.max_speed.unwrap_or(0),
            },
        };
        Vehicle::new(self.id, self.manufacturer, self.model, self.purchase_price, kind)
    }
}

#[derive(Debug, Deserialize)]
struct RentalRow {
    timestamp: String,
    driver: String,
    vehicle_id: String,
    start_x: i64,
    start_y: i64,
    finish_x: i64,
    finish_y: i64,
    duration: u32,
    malfunction: String,
    promotion: String,
}

fn is_yes(flag: &str) -> bool {
    matches!(flag.trim().to_lowercase().as_str(), "yes" | "da" | "true")
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::All).from_reader(reader)
}

/// Parses a vehicle catalog. The first row with a given id wins.
pub fn read_vehicles<R: Read>(reader: R) -> BTreeMap<String, Vehicle> {
    let mut fleet = BTreeMap::new();

    for (index, result) in csv_reader(reader).deserialize::<VehicleRow>().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid vehicle row");
                continue;
            }
        };
        if fleet.contains_key(&row.id) {
            warn!(line, vehicle_id = %row.id, "Duplicate vehicle ignored");
            continue;
        }
        let vehicle = row.into_vehicle();
        fleet.insert(vehicle.id.clone(), vehicle);
    }

    fleet
}

/// Parses the rental list against a loaded fleet.
///
/// Rentals for unknown vehicles, with coordinates outside the grid, or
/// repeating an earlier (vehicle, timestamp) pair are rejected. Each accepted
/// rental registers its driver. The result is sorted by timestamp, keeping
/// file order within a timestamp.
pub fn read_rentals<R: Read>(
    reader: R,
    fleet: &BTreeMap<String, Vehicle>,
    drivers: &mut DriverRegistry,
) -> Vec<Rental> {
    let mut rentals = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for (index, result) in csv_reader(reader).deserialize::<RentalRow>().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!(line, error = %e, "Skipping invalid rental row");
                continue;
            }
        };

        if !fleet.contains_key(&row.vehicle_id) {
            warn!(line, vehicle_id = %row.vehicle_id, "Rental for unknown vehicle");
            continue;
        }
        let (Some(start), Some(finish)) = (
            checked_cell(row.start_x, row.start_y),
            checked_cell(row.finish_x, row.finish_y),
        ) else {
            warn!(
                line,
                vehicle_id = %row.vehicle_id,
                start = ?(row.start_x, row.start_y),
                finish = ?(row.finish_x, row.finish_y),
                "Coordinates outside the grid"
            );
            continue;
        };
        if !seen.insert((row.vehicle_id.clone(), row.timestamp.clone())) {
            warn!(
                line,
                vehicle_id = %row.vehicle_id,
                timestamp = %row.timestamp,
                "Rental already exists"
            );
            continue;
        }

        let malfunction = if is_yes(&row.malfunction) {
            Malfunction::reported_at(row.timestamp.clone())
        } else {
            Malfunction::None
        };
        rentals.push(Rental {
            driver: drivers.register(&row.driver),
            timestamp: row.timestamp,
            vehicle_id: row.vehicle_id,
            start,
            finish,
            duration_secs: row.duration,
            malfunction,
            promotion: is_yes(&row.promotion),
        });
    }

    rentals.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    rentals
}

pub fn load_vehicles(path: &Path) -> Result<BTreeMap<String, Vehicle>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open vehicle catalog '{}'", path.display()))?;
    let fleet = read_vehicles(file);
    info!(path = %path.display(), vehicles = fleet.len(), "Vehicles loaded");
    Ok(fleet)
}

pub fn load_rentals(
    path: &Path,
    fleet: &BTreeMap<String, Vehicle>,
    drivers: &mut DriverRegistry,
) -> Result<Vec<Rental>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open rentals '{}'", path.display()))?;
    let rentals = read_rentals(file, fleet, drivers);
    info!(
        path = %path.display(),
        rentals = rentals.len(),
        drivers = drivers.len(),
        "Rentals loaded"
    );
    Ok(rentals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;

    const VEHICLES: &str = "\
id,manufacturer,model,purchase_date,purchase_price,range_per_charge,max_speed,description,kind
A1,Tesla,Model 3,1.1.2020.,40000,,,sedan,automobil
B1,Xiaomi,M1,,800,40,,,bicikl
T1,Segway,Ninebot,,450,,25,,scooter
A1,Other,Dup,,1,,,,car
H1,Hover,Board,,10,,,,hoverboard
X1,Bad,Price,,lots,,,,car
";

    const RENTALS: &str = "\
timestamp,driver,vehicle_id,start_x,start_y,finish_x,finish_y,duration,malfunction,promotion
2024-01-01 11:00,Marko,B1,\"0\",\"0\",\"0\",\"1\",4,ne,da
2024-01-01 10:00,Ana,A1,5,5,5,7,10,ne,ne
2024-01-01 10:00,Ana,B1,0,0,0,1,4,da,ne
2024-01-01 10:00,Iva,A1,1,1,2,2,3,ne,ne
2024-01-01 12:00,Iva,T1,0,0,20,1,5,ne,ne
2024-01-01 12:00,Iva,Z9,0,0,1,1,5,ne,ne
2024-01-01 12:00,Iva,T1,0,0,nine,1,5,ne,ne
";

    #[test]
    fn test_read_vehicles_kinds_and_duplicates() {
        let fleet = read_vehicles(VEHICLES.as_bytes());

        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet["A1"].manufacturer, "Tesla");
        assert!(matches!(fleet["A1"].kind, VehicleKind::Car { .. }));
        assert_eq!(fleet["B1"].kind, VehicleKind::Bike { range_per_charge: 40 });
        assert_eq!(fleet["T1"].kind, VehicleKind::Scooter { max_speed: 25 });
    }

    #[test]
    fn test_read_rentals_filters_and_sorts() {
        let fleet = read_vehicles(VEHICLES.as_bytes());
        let mut drivers = DriverRegistry::new();

        let rentals = read_rentals(RENTALS.as_bytes(), &fleet, &mut drivers);

        let ids: Vec<_> = rentals.iter().map(|r| r.id()).collect();
        assert_eq!(
            ids,
            vec![
                "2024-01-01 10:00 A1",
                "2024-01-01 10:00 B1",
                "2024-01-01 11:00 B1",
            ]
        );
        assert_eq!(rentals[0].start, Cell::new(5, 5));
        assert_eq!(rentals[0].finish, Cell::new(5, 7));
        assert!(rentals[1].malfunction.is_reported());
        assert!(rentals[2].promotion);
        assert!(!rentals[0].promotion);
    }

    #[test]
    fn test_only_accepted_rentals_count_for_drivers() {
        let fleet = read_vehicles(VEHICLES.as_bytes());
        let mut drivers = DriverRegistry::new();

        read_rentals(RENTALS.as_bytes(), &fleet, &mut drivers);

        assert_eq!(drivers.seen_count("Ana"), 2);
        assert_eq!(drivers.seen_count("Marko"), 1);
        assert_eq!(drivers.seen_count("Iva"), 0);
        assert!(drivers.get("Iva").is_none());
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = load_vehicles(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("vehicle catalog"));
    }
}
