//! Rentals: who drove which vehicle, from where to where, and for how long.

use crate::driver::Driver;
use crate::grid::Cell;
use std::sync::Arc;

/// Inclusive bounds of the narrow city on both axes.
pub const NARROW_MIN: u8 = 5;
pub const NARROW_MAX: u8 = 14;

/// Inclusive bounds of valid rental coordinates.
pub const COORD_MIN: i64 = 0;
pub const COORD_MAX: i64 = 19;

pub const MALFUNCTION_DESCRIPTION: &str = "Vehicle broke down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Malfunction {
    None,
    Reported { description: String, at: String },
}

impl Malfunction {
    pub fn reported_at(at: impl Into<String>) -> Self {
        Malfunction::Reported {
            description: MALFUNCTION_DESCRIPTION.to_string(),
            at: at.into(),
        }
    }

    pub fn is_reported(&self) -> bool {
        matches!(self, Malfunction::Reported { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Rental {
    /// Sortable date-time string; rentals sharing it form one batch.
    pub timestamp: String,
    pub driver: Arc<Driver>,
    pub vehicle_id: String,
    pub start: Cell,
    pub finish: Cell,
    pub duration_secs: u32,
    pub malfunction: Malfunction,
    pub promotion: bool,
}

impl Rental {
    /// `<timestamp> <vehicle id>`.
    pub fn id(&self) -> String {
        format!("{} {}", self.timestamp, self.vehicle_id)
    }

    /// File name stem derived from [`Rental::id`].
    pub fn file_stem(&self) -> String {
        safe_file_stem(&self.id())
    }

    /// Both start and finish lie inside the narrow city.
    pub fn is_narrow(&self) -> bool {
        self.start.is_within(NARROW_MIN, NARROW_MAX) && self.finish.is_within(NARROW_MIN, NARROW_MAX)
    }
}

pub fn safe_file_stem(rental_id: &str) -> String {
    rental_id.replace(':', "_")
}

/// Converts a raw coordinate pair into a cell, if both axes are in range.
pub fn checked_cell(row: i64, col: i64) -> Option<Cell> {
    let in_range = |c: i64| (COORD_MIN..=COORD_MAX).contains(&c);
    if in_range(row) && in_range(col) {
        Some(Cell::new(row as u8, col as u8))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rental(start: (u8, u8), finish: (u8, u8)) -> Rental {
        Rental {
            timestamp: "2024-01-01 10:00".to_string(),
            driver: Arc::new(Driver::new("Ana")),
            vehicle_id: "A1".to_string(),
            start: Cell::new(start.0, start.1),
            finish: Cell::new(finish.0, finish.1),
            duration_secs: 10,
            malfunction: Malfunction::None,
            promotion: false,
        }
    }

    #[test]
    fn test_narrow_city_corners() {
        assert!(rental((5, 5), (14, 14)).is_narrow());
        assert!(!rental((4, 5), (14, 14)).is_narrow());
        assert!(!rental((5, 5), (14, 15)).is_narrow());
    }

    #[test]
    fn test_id_and_file_stem() {
        let r = rental((0, 0), (0, 1));
        assert_eq!(r.id(), "2024-01-01 10:00 A1");
        assert_eq!(r.file_stem(), "2024-01-01 10_00 A1");
    }

    #[test]
    fn test_checked_cell_bounds() {
        assert_eq!(checked_cell(0, 19), Some(Cell::new(0, 19)));
        assert_eq!(checked_cell(-1, 3), None);
        assert_eq!(checked_cell(3, 20), None);
    }

    #[test]
    fn test_malfunction_flag() {
        assert!(Malfunction::reported_at("2024-01-01 10:00").is_reported());
        assert!(!Malfunction::None.is_reported());
    }
}
