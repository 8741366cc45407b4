//! Drivers and the registry that counts their rentals.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Seen-count at which a driver gets the loyalty discount.
///
/// The rule is an exact match: the 11th rental no longer qualifies.
pub const LOYALTY_THRESHOLD: u32 = 10;

const IDENTIFICATION_DIGITS: usize = 8;
const LICENCE_DIGITS: usize = 10;

/// A driver, identified by name.
#[derive(Debug, Clone, Serialize)]
pub struct Driver {
    pub name: String,
    pub identification_number: String,
    pub licence_number: String,
}

impl Driver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identification_number: random_digits(IDENTIFICATION_DIGITS),
            licence_number: random_digits(LICENCE_DIGITS),
        }
    }
}

impl PartialEq for Driver {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Driver {}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Deduplicates drivers by name and counts how often each name was rented to.
///
/// One registry lives for one simulation run; build a new one to start
/// counting from zero.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<Driver>>,
    seen: HashMap<String, u32>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the driver for `name`, creating it on first sight, and bumps
    /// its seen-count.
    pub fn register(&mut self, name: &str) -> Arc<Driver> {
        *self.seen.entry(name.to_string()).or_insert(0) += 1;
        self.drivers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Driver::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Driver>> {
        self.drivers.get(name)
    }

    pub fn seen_count(&self, name: &str) -> u32 {
        self.seen.get(name).copied().unwrap_or(0)
    }

    pub fn is_loyalty_eligible(&self, name: &str) -> bool {
        self.seen_count(name) == LOYALTY_THRESHOLD
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
