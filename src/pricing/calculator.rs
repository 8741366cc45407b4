//! Price formula and rental settlement.

use chrono::Utc;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::SettlementError;
use super::record::{self, PricingRecord};
use super::store::RecordStore;
use crate::driver::DriverRegistry;
use crate::output::{Bill, location, write_bill};
use crate::rental::{Malfunction, Rental};
use crate::vehicle::Vehicle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceInputs {
    pub unit_price: u32,
    pub duration_secs: u32,
    pub distance_multiplier: f64,
    /// Percent.
    pub discount: f64,
    /// Percent.
    pub promotion: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceBreakdown {
    pub gross: f64,
    pub discount: f64,
    pub promotion: f64,
    pub total: f64,
}

/// `gross = unit_price * duration * multiplier`; both discounts are taken
/// from `gross` independently, never from each other's result.
pub fn quote(inputs: &PriceInputs) -> PriceBreakdown {
    let gross =
        inputs.unit_price as f64 * inputs.duration_secs as f64 * inputs.distance_multiplier;
    let discount = inputs.discount / 100.0 * gross;
    let promotion = inputs.promotion / 100.0 * gross;
    PriceBreakdown {
        gross,
        discount,
        promotion,
        total: gross - discount - promotion,
    }
}

fn parse_field<T: FromStr>(
    record: &PricingRecord,
    rental_id: &str,
    key: &str,
) -> Result<T, SettlementError> {
    let raw = record.get(key).ok_or_else(|| SettlementError::MissingField {
        rental_id: rental_id.to_string(),
        key: key.to_string(),
    })?;
    raw.trim()
        .parse()
        .map_err(|_| SettlementError::MalformedField {
            rental_id: rental_id.to_string(),
            key: key.to_string(),
            value: raw.to_string(),
        })
}

/// Settles rentals against their pricing records and writes their bills.
#[derive(Debug)]
pub struct Settler {
    store: RecordStore,
    bills_dir: PathBuf,
    drivers: Arc<DriverRegistry>,
}

impl Settler {
    pub fn new(store: RecordStore, bills_dir: impl Into<PathBuf>, drivers: Arc<DriverRegistry>) -> Self {
        Self {
            store,
            bills_dir: bills_dir.into(),
            drivers,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Reads the rental's pricing inputs from its record.
    ///
    /// The loyalty discount only counts when the driver's seen-count is
    /// exactly the threshold; the promotional discount only when the rental
    /// carries a promotion.
    pub fn inputs(
        &self,
        record: &PricingRecord,
        rental: &Rental,
        vehicle: &Vehicle,
    ) -> Result<PriceInputs, SettlementError> {
        let id = rental.id();
        let unit_price = parse_field(record, &id, record::unit_price_key(&vehicle.kind))?;
        let distance_multiplier = parse_field(record, &id, record::distance_key(rental.is_narrow()))?;
        let discount = if self.drivers.is_loyalty_eligible(&rental.driver.name) {
            parse_field(record, &id, record::DISCOUNT)?
        } else {
            0.0
        };
        let promotion = if rental.promotion {
            parse_field(record, &id, record::DISCOUNT_PROM)?
        } else {
            0.0
        };

        Ok(PriceInputs {
            unit_price,
            duration_secs: rental.duration_secs,
            distance_multiplier,
            discount,
            promotion,
        })
    }

    /// Computes the rental's total, writes its bill and returns the total.
    ///
    /// A rental without a pricing record contributes zero and gets no bill.
    /// A malfunctioning rental always totals zero and always gets a bill;
    /// only its unit price is read from the record.
    #[tracing::instrument(skip_all, fields(rental_id = %rental.id()))]
    pub fn settle(&self, rental: &Rental, vehicle: &Vehicle) -> Result<f64, SettlementError> {
        let id = rental.id();
        let Some(record) = self.store.load(&id)? else {
            warn!(path = %self.store.path_for(&id).display(), "No pricing record, settling at zero");
            return Ok(0.0);
        };

        let (unit_price, breakdown, malfunction_description, malfunction_at) =
            match &rental.malfunction {
                Malfunction::Reported { description, at } => {
                    let unit_price =
                        parse_field(&record, &id, record::unit_price_key(&vehicle.kind))
                            .unwrap_or_else(|e| {
                                warn!(error = %e, "Unreadable unit price on broken rental");
                                0
                            });
                    (
                        unit_price,
                        PriceBreakdown::default(),
                        Some(description.clone()),
                        Some(at.clone()),
                    )
                }
                Malfunction::None => {
                    let inputs = self.inputs(&record, rental, vehicle)?;
                    (inputs.unit_price, quote(&inputs), None, None)
                }
            };
        let broken = malfunction_description.is_some();
        let total = breakdown.total;

        let bill = Bill {
            rental_timestamp: rental.timestamp.clone(),
            driver_name: rental.driver.name.clone(),
            vehicle_id: rental.vehicle_id.clone(),
            unit_price,
            start_location: location(rental.start),
            finish_location: location(rental.finish),
            usage_duration_secs: rental.duration_secs,
            malfunction: broken,
            malfunction_description,
            malfunction_at,
            promotion: rental.promotion,
            discount: breakdown.discount,
            promotion_discount: breakdown.promotion,
            total_price: total,
            narrow_city: rental.is_narrow(),
            settled_at: Utc::now(),
        };

        let bill_path = record
            .get(record::BILL_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.bills_dir.join(format!("{}.csv", rental.file_stem())));
        write_bill(&bill_path, &bill)?;

        info!(total, gross = breakdown.gross, malfunction = broken, "Rental settled");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PricingConfig;
    use crate::grid::Cell;
    use crate::output::read_bill;
    use crate::vehicle::VehicleKind;
    use tempfile::TempDir;

    fn car() -> Vehicle {
        Vehicle::new(
            "A1",
            "Tesla",
            "Model 3",
            40,
            VehicleKind::Car {
                purchase_date: "1.1.2020.".to_string(),
                description: "sedan".to_string(),
            },
        )
    }

    fn rental(drivers: &mut DriverRegistry, driver: &str) -> Rental {
        Rental {
            timestamp: "2024-01-01 10:00".to_string(),
            driver: drivers.register(driver),
            vehicle_id: "A1".to_string(),
            start: Cell::new(5, 5),
            finish: Cell::new(5, 7),
            duration_secs: 10,
            malfunction: Malfunction::None,
            promotion: false,
        }
    }

    struct Fixture {
        dir: TempDir,
        settler: Settler,
    }

    fn fixture(drivers: DriverRegistry) -> Fixture {
        let dir = TempDir::new().unwrap();
        let settler = Settler::new(
            RecordStore::new(dir.path().join("records")),
            dir.path().join("bills"),
            Arc::new(drivers),
        );
        Fixture { dir, settler }
    }

    fn prepare(f: &Fixture, rental: &Rental, pricing: &PricingConfig) {
        let record = PricingRecord::prepare(rental, &car(), pricing, &f.dir.path().join("bills"));
        f.settler.store().flush(&rental.id(), &record).unwrap();
    }

    #[test]
    fn test_discounts_are_subtractive_not_compounded() {
        let inputs = PriceInputs {
            unit_price: 2,
            duration_secs: 50,
            distance_multiplier: 1.0,
            discount: 10.0,
            promotion: 20.0,
        };
        let breakdown = quote(&inputs);

        assert_eq!(breakdown.gross, 100.0);
        assert_eq!(breakdown.discount, 10.0);
        assert_eq!(breakdown.promotion, 20.0);
        assert_eq!(breakdown.total, 70.0);
        // Compounding would give 100 * 0.9 * 0.8 = 72.
        assert_ne!(breakdown.total, 72.0);
    }

    #[test]
    fn test_quote_without_discounts_is_gross() {
        let breakdown = quote(&PriceInputs {
            unit_price: 3,
            duration_secs: 4,
            distance_multiplier: 1.5,
            discount: 0.0,
            promotion: 0.0,
        });
        assert_eq!(breakdown.total, 18.0);
    }

    #[test]
    fn test_settle_writes_bill() {
        let mut drivers = DriverRegistry::new();
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());

        let total = f.settler.settle(&r, &car()).unwrap();

        // narrow: 40 * 10 * 1.0, no loyalty, no promotion
        assert_eq!(total, 400.0);
        let bill = read_bill(&f.dir.path().join("bills").join(format!("{}.csv", r.file_stem()))).unwrap();
        assert_eq!(bill.total_price, 400.0);
        assert_eq!(bill.unit_price, 40);
        assert_eq!(bill.start_location, "5,5");
        assert_eq!(bill.finish_location, "5,7");
        assert!(bill.narrow_city);
        assert!(!bill.malfunction);
        assert_eq!(bill.malfunction_description, None);
    }

    #[test]
    fn test_malfunction_always_settles_at_zero() {
        let mut drivers = DriverRegistry::new();
        let mut r = rental(&mut drivers, "Ana");
        r.malfunction = Malfunction::reported_at(r.timestamp.clone());
        r.promotion = true;
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());

        let total = f.settler.settle(&r, &car()).unwrap();

        assert_eq!(total, 0.0);
        let bill = read_bill(&f.dir.path().join("bills").join(format!("{}.csv", r.file_stem()))).unwrap();
        assert!(bill.malfunction);
        assert_eq!(bill.total_price, 0.0);
        assert_eq!(bill.promotion_discount, 0.0);
        assert_eq!(
            bill.malfunction_description.as_deref(),
            Some(crate::rental::MALFUNCTION_DESCRIPTION)
        );
    }

    #[test]
    fn test_malfunction_bills_despite_unreadable_pricing_fields() {
        let mut drivers = DriverRegistry::new();
        let mut r = rental(&mut drivers, "Ana");
        r.malfunction = Malfunction::reported_at(r.timestamp.clone());
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());
        f.settler
            .store()
            .upsert(&r.id(), record::DISTANCE_NARROW, "fast")
            .unwrap();

        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 0.0);

        let bill = read_bill(&f.dir.path().join("bills").join(format!("{}.csv", r.file_stem()))).unwrap();
        assert!(bill.malfunction);
        assert_eq!(bill.unit_price, 40);
        assert_eq!(bill.total_price, 0.0);
        assert_eq!(bill.malfunction_at.as_deref(), Some("2024-01-01 10:00"));
    }

    #[test]
    fn test_loyalty_discount_only_at_exact_count() {
        let pricing = PricingConfig::default();

        let mut drivers = DriverRegistry::new();
        for _ in 0..9 {
            drivers.register("Ana");
        }
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);
        prepare(&f, &r, &pricing);
        // 10th sighting: 400 - 10%
        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 360.0);

        let mut drivers = DriverRegistry::new();
        for _ in 0..10 {
            drivers.register("Ana");
        }
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);
        prepare(&f, &r, &pricing);
        // 11th sighting: no discount
        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 400.0);
    }

    #[test]
    fn test_promotion_applies_only_when_flagged() {
        let mut drivers = DriverRegistry::new();
        let mut r = rental(&mut drivers, "Ana");
        r.promotion = true;
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());

        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 380.0);
    }

    #[test]
    fn test_wide_rental_uses_wide_multiplier() {
        let mut drivers = DriverRegistry::new();
        let mut r = rental(&mut drivers, "Ana");
        r.start = Cell::new(0, 0);
        r.finish = Cell::new(0, 2);
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());

        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 600.0);
    }

    #[test]
    fn test_missing_record_settles_at_zero_without_bill() {
        let mut drivers = DriverRegistry::new();
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);

        assert_eq!(f.settler.settle(&r, &car()).unwrap(), 0.0);
        assert!(!f.dir.path().join("bills").exists());
    }

    #[test]
    fn test_malformed_field_is_surfaced() {
        let mut drivers = DriverRegistry::new();
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);
        prepare(&f, &r, &PricingConfig::default());
        f.settler
            .store()
            .upsert(&r.id(), record::DISTANCE_NARROW, "fast")
            .unwrap();

        let err = f.settler.settle(&r, &car()).unwrap_err();

        match err {
            SettlementError::MalformedField { key, value, .. } => {
                assert_eq!(key, record::DISTANCE_NARROW);
                assert_eq!(value, "fast");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_unit_price_is_surfaced() {
        let mut drivers = DriverRegistry::new();
        let r = rental(&mut drivers, "Ana");
        let f = fixture(drivers);
        f.settler
            .store()
            .upsert(&r.id(), record::DISTANCE_NARROW, 1.0)
            .unwrap();

        assert!(matches!(
            f.settler.settle(&r, &car()),
            Err(SettlementError::MissingField { .. })
        ));
    }
}
