//! One rental's ride across the grid, followed by its settlement.
//!
//! ```text
//! Pending --> Moving --> Settled
//!    \
//!     +----> ShortCircuited --> Settled   (malfunction: no movement)
//! ```

use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::barrier::ArrivalGuard;
use crate::grid::{Cell, GridState, occupant_label};
use crate::pricing::Settler;
use crate::rental::Rental;
use crate::vehicle::SharedVehicle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RentalPhase {
    Pending,
    Moving,
    ShortCircuited,
    Settled,
}

/// Shared by every task of a run.
pub struct TaskContext {
    pub grid: Arc<GridState>,
    pub settler: Arc<Settler>,
    pub marker_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentalOutcome {
    pub rental_id: String,
    pub vehicle_id: String,
    pub phases: Vec<RentalPhase>,
    pub steps: usize,
    pub malfunction: bool,
    /// Settled total; zero when settlement failed.
    pub total: f64,
    pub settled: bool,
}

/// Cells visited from `start` to `finish`: rows first, then columns.
/// `start` itself is not included.
pub fn manhattan_path(start: Cell, finish: Cell) -> Vec<Cell> {
    let mut path = Vec::new();
    let mut current = start;

    while current.row != finish.row {
        if finish.row > current.row {
            current.row += 1;
        } else {
            current.row -= 1;
        }
        path.push(current);
    }
    while current.col != finish.col {
        if finish.col > current.col {
            current.col += 1;
        } else {
            current.col -= 1;
        }
        path.push(current);
    }

    path
}

/// Even spacing of `steps` over `duration_secs`, in whole milliseconds.
pub fn step_delay(duration_secs: u32, steps: usize) -> Duration {
    if steps == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::from(duration_secs) * 1000 / steps as u64)
}

pub struct RentalTask {
    rental: Rental,
    vehicle: SharedVehicle,
    ctx: Arc<TaskContext>,
    phases: Vec<RentalPhase>,
}

impl RentalTask {
    pub fn new(rental: Rental, vehicle: SharedVehicle, ctx: Arc<TaskContext>) -> Self {
        Self {
            rental,
            vehicle,
            ctx,
            phases: vec![RentalPhase::Pending],
        }
    }

    pub fn phase(&self) -> RentalPhase {
        self.phases.last().copied().unwrap_or(RentalPhase::Pending)
    }

    fn enter(&mut self, phase: RentalPhase) {
        debug!(from = ?self.phase(), to = ?phase, "Rental phase change");
        self.phases.push(phase);
    }

    /// Runs the rental to settlement. `arrival` is released when this
    /// returns or unwinds.
    pub async fn run(mut self, arrival: ArrivalGuard) -> RentalOutcome {
        let _arrival = arrival;

        let malfunction = self.rental.malfunction.is_reported();
        let steps = if malfunction {
            self.enter(RentalPhase::ShortCircuited);
            self.mark_malfunction();
            0
        } else {
            self.enter(RentalPhase::Moving);
            self.drive().await
        };

        let (total, settled) = self.settle();
        self.enter(RentalPhase::Settled);

        RentalOutcome {
            rental_id: self.rental.id(),
            vehicle_id: self.rental.vehicle_id.clone(),
            phases: self.phases,
            steps,
            malfunction,
            total,
            settled,
        }
    }

    fn battery(&self) -> u8 {
        self.vehicle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .battery
    }

    fn mark_malfunction(&self) {
        let label = occupant_label(&self.rental.vehicle_id, self.battery());
        // Expiry runs on its own; the marker is display only.
        let _expiry = self
            .ctx
            .grid
            .place_ephemeral(self.rental.start, label, self.ctx.marker_ttl);
    }

    async fn drive(&self) -> usize {
        let path = manhattan_path(self.rental.start, self.rental.finish);
        if path.is_empty() {
            warn!(start = %self.rental.start, "Rental starts where it finishes, settling at once");
            return 0;
        }

        let delay = step_delay(self.rental.duration_secs, path.len());
        for cell in &path {
            let battery = self
                .vehicle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain();
            self.ctx.grid.move_to(*cell, &self.rental.vehicle_id, battery);
            tokio::time::sleep(delay).await;
        }
        path.len()
    }

    fn settle(&self) -> (f64, bool) {
        let vehicle = self
            .vehicle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match self.ctx.settler.settle(&self.rental, &vehicle) {
            Ok(total) => (total, true),
            Err(e) => {
                error!(error = %e, "Settlement failed");
                (0.0, false)
            }
        }
    }
}
