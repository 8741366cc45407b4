//! Rental pricing: per-rental pricing records and settlement.
//!
//! Pricing inputs are written to a [`PricingRecord`] for every rental before
//! the simulation starts, then read back when the rental settles.

pub mod calculator;
pub mod record;
pub mod store;

pub use calculator::{PriceBreakdown, PriceInputs, Settler, quote};
pub use record::PricingRecord;
pub use store::RecordStore;

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PricingConfig;
use crate::rental::Rental;
use crate::vehicle::Vehicle;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("pricing record for '{rental_id}' has no '{key}'")]
    MissingField { rental_id: String, key: String },

    #[error("pricing record for '{rental_id}' has malformed '{key}': '{value}'")]
    MalformedField {
        rental_id: String,
        key: String,
        value: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pricing record error: {0}")]
    Record(#[from] serde_json::Error),

    #[error("bill error: {0}")]
    Bill(#[from] csv::Error),
}

/// Writes the pricing record of every rental, returning how many were written.
///
/// Failures are logged per rental and do not stop the others.
pub fn prepare_records(
    store: &RecordStore,
    rentals: &[Rental],
    fleet: &BTreeMap<String, Vehicle>,
    pricing: &PricingConfig,
    bills_dir: &Path,
) -> usize {
    let mut written = 0;
    for rental in rentals {
        let Some(vehicle) = fleet.get(&rental.vehicle_id) else {
            warn!(rental_id = %rental.id(), "No vehicle for rental, skipping pricing record");
            continue;
        };
        let record = PricingRecord::prepare(rental, vehicle, pricing, bills_dir);
        match store.flush(&rental.id(), &record) {
            Ok(_) => written += 1,
            Err(e) => error!(rental_id = %rental.id(), error = %e, "Failed to write pricing record"),
        }
    }
    info!(written, total = rentals.len(), "Pricing records prepared");
    written
}
