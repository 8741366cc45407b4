//! Runs rentals in timestamp batches.
//!
//! Batches run strictly one after another. Within a batch every rental runs
//! as its own tokio task; the batch is done once all of them have arrived
//! at the batch's [`CompletionBarrier`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{Instrument, error, info, trace, warn};

use super::task::{RentalOutcome, RentalTask, TaskContext};
use crate::barrier::CompletionBarrier;
use crate::grid::GridState;
use crate::rental::Rental;
use crate::vehicle::SharedVehicle;

/// Rentals sharing one timestamp.
#[derive(Debug, Clone)]
pub struct Batch {
    pub timestamp: String,
    pub rentals: Vec<Rental>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub timestamp: String,
    pub outcomes: Vec<RentalOutcome>,
    /// Tasks that panicked or never started.
    pub lost: usize,
}

/// Groups rentals by timestamp, keeping the order in which timestamps first
/// appear and the order of rentals within each group.
pub fn group_by_timestamp(rentals: Vec<Rental>) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for rental in rentals {
        match index.get(&rental.timestamp) {
            Some(&i) => batches[i].rentals.push(rental),
            None => {
                index.insert(rental.timestamp.clone(), batches.len());
                batches.push(Batch {
                    timestamp: rental.timestamp.clone(),
                    rentals: vec![rental],
                });
            }
        }
    }

    batches
}

pub struct BatchScheduler {
    fleet: HashMap<String, SharedVehicle>,
    ctx: Arc<TaskContext>,
    quiescence: Duration,
}

impl BatchScheduler {
    pub fn new(
        fleet: HashMap<String, SharedVehicle>,
        ctx: Arc<TaskContext>,
        quiescence: Duration,
    ) -> Self {
        Self {
            fleet,
            ctx,
            quiescence,
        }
    }

    pub fn grid(&self) -> &Arc<GridState> {
        &self.ctx.grid
    }

    pub fn fleet(&self) -> &HashMap<String, SharedVehicle> {
        &self.fleet
    }

    #[tracing::instrument(skip_all, fields(batches = batches.len()))]
    pub async fn run(&self, batches: Vec<Batch>) -> Vec<BatchReport> {
        let mut reports = Vec::with_capacity(batches.len());
        for batch in batches {
            reports.push(self.run_batch(batch).await);
        }
        reports
    }

    /// Charges the batch's vehicles, runs all its rentals concurrently,
    /// waits for every one to settle, pauses, then clears the grid.
    #[tracing::instrument(skip_all, fields(timestamp = %batch.timestamp, rentals = batch.rentals.len()))]
    pub async fn run_batch(&self, batch: Batch) -> BatchReport {
        let barrier = CompletionBarrier::new(batch.rentals.len());
        let mut tasks = Vec::with_capacity(batch.rentals.len());
        let mut lost = 0;

        for rental in &batch.rentals {
            if let Some(vehicle) = self.fleet.get(&rental.vehicle_id) {
                vehicle.lock().unwrap_or_else(PoisonError::into_inner).charge();
            }
        }

        info!("Starting batch");

        for rental in batch.rentals {
            let arrival = barrier.guard();
            let Some(vehicle) = self.fleet.get(&rental.vehicle_id).cloned() else {
                warn!(rental_id = %rental.id(), "Vehicle missing from fleet, skipping rental");
                lost += 1;
                drop(arrival);
                continue;
            };

            let span = tracing::info_span!(
                "rental",
                rental_id = %rental.id(),
                vehicle_id = %rental.vehicle_id,
            );
            let task = RentalTask::new(rental, vehicle, Arc::clone(&self.ctx));
            tasks.push(tokio::spawn(task.run(arrival).instrument(span)));
        }

        barrier.wait().await;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Rental task failed");
                    lost += 1;
                }
            }
        }

        let total: f64 = outcomes.iter().map(|o| o.total).sum();
        info!(settled = outcomes.len(), lost, total, "Batch settled");
        trace!("Grid before clearing:\n{}", self.ctx.grid.render());

        tokio::time::sleep(self.quiescence).await;
        self.ctx.grid.clear();

        BatchReport {
            timestamp: batch.timestamp,
            outcomes,
            lost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::grid::Cell;
    use crate::driver::DriverRegistry;
    use crate::pricing::{RecordStore, Settler};
    use crate::rental::Malfunction;
    use crate::vehicle::{Vehicle, VehicleKind};
    use tempfile::TempDir;

    fn rental(timestamp: &str, vehicle_id: &str) -> Rental {
        Rental {
            timestamp: timestamp.to_string(),
            driver: Arc::new(Driver::new("Ana")),
            vehicle_id: vehicle_id.to_string(),
            start: Cell::new(0, 0),
            finish: Cell::new(0, 1),
            duration_secs: 1,
            malfunction: Malfunction::None,
            promotion: false,
        }
    }

    #[test]
    fn test_group_by_timestamp_keeps_order() {
        let batches = group_by_timestamp(vec![
            rental("2024-01-01 10:00", "A1"),
            rental("2024-01-01 10:00", "B1"),
            rental("2024-01-01 11:00", "A1"),
            rental("2024-01-01 10:00", "T1"),
        ]);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].timestamp, "2024-01-01 10:00");
        let ids: Vec<_> = batches[0].rentals.iter().map(|r| r.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "B1", "T1"]);
        assert_eq!(batches[1].rentals.len(), 1);
    }

    #[test]
    fn test_group_empty() {
        assert!(group_by_timestamp(Vec::new()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rental_without_vehicle_is_lost_and_batch_completes() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(TaskContext {
            grid: Arc::new(GridState::new()),
            settler: Arc::new(Settler::new(
                RecordStore::new(dir.path().join("records")),
                dir.path().join("bills"),
                Arc::new(DriverRegistry::new()),
            )),
            marker_ttl: Duration::from_secs(2),
        });
        let bike = Vehicle::new("B1", "Xiaomi", "M1", 8, VehicleKind::Bike { range_per_charge: 40 });
        let fleet = HashMap::from([("B1".to_string(), bike.into_shared())]);
        let scheduler = BatchScheduler::new(fleet, ctx, Duration::from_secs(5));

        let report = scheduler
            .run_batch(Batch {
                timestamp: "2024-01-01 10:00".to_string(),
                rentals: vec![rental("2024-01-01 10:00", "B1"), rental("2024-01-01 10:00", "ZZ")],
            })
            .await;

        assert_eq!(report.lost, 1);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].vehicle_id, "B1");
        assert!(scheduler.grid().is_empty());
    }
}
