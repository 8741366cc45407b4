//! Durable pricing records, one JSON file per rental.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SettlementError;
use super::record::PricingRecord;
use crate::rental::safe_file_stem;

/// Reads and writes pricing records under a single folder.
///
/// Records are named after the rental id with `:` replaced, so each rental
/// owns exactly one file and different rentals never contend.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, rental_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_file_stem(rental_id)))
    }

    /// Reads the record for `rental_id`; `None` if it was never written.
    pub fn load(&self, rental_id: &str) -> Result<Option<PricingRecord>, SettlementError> {
        let path = self.path_for(rental_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Overlays `record` on whatever is stored for `rental_id` and writes the
    /// result back. Returns the merged record.
    pub fn flush(
        &self,
        rental_id: &str,
        record: &PricingRecord,
    ) -> Result<PricingRecord, SettlementError> {
        let mut merged = self.load(rental_id)?.unwrap_or_default();
        merged.overlay(record);

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(rental_id);
        fs::write(&path, serde_json::to_string_pretty(&merged)?)?;
        debug!(path = %path.display(), keys = merged.len(), "Pricing record written");
        Ok(merged)
    }

    /// Sets a single key on the record for `rental_id`.
    pub fn upsert(
        &self,
        rental_id: &str,
        key: &str,
        value: impl ToString,
    ) -> Result<PricingRecord, SettlementError> {
        self.flush(rental_id, &PricingRecord::new().with(key, value))
    }
}
