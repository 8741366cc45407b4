//! The rental simulation: batches of concurrent rides, each ending in a
//! settled bill.

pub mod scheduler;
pub mod task;

pub use scheduler::{Batch, BatchReport, BatchScheduler, group_by_timestamp};
pub use task::{RentalOutcome, RentalPhase, RentalTask, TaskContext};

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError};
use tracing::{error, info};

use crate::config::SimConfig;
use crate::driver::DriverRegistry;
use crate::grid::{GridObserver, GridState};
use crate::loader::{load_rentals, load_vehicles};
use crate::output::save_damaged;
use crate::pricing::{RecordStore, Settler, prepare_records};
use crate::rental::Rental;
use crate::vehicle::Vehicle;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub batches: usize,
    pub rentals: usize,
    pub settled: usize,
    pub failed: usize,
    pub malfunctions: usize,
    pub revenue: f64,
    pub damaged_saved: usize,
}

impl RunSummary {
    fn from_reports(reports: &[BatchReport]) -> Self {
        let mut summary = RunSummary {
            batches: reports.len(),
            ..Default::default()
        };
        for report in reports {
            summary.failed += report.lost;
            for outcome in &report.outcomes {
                summary.rentals += 1;
                if outcome.settled {
                    summary.settled += 1;
                } else {
                    summary.failed += 1;
                }
                if outcome.malfunction {
                    summary.malfunctions += 1;
                }
                summary.revenue += outcome.total;
            }
        }
        summary
    }
}

pub struct Simulation {
    config: SimConfig,
    observer: Option<Arc<dyn GridObserver>>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn GridObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Loads vehicles and rentals from the configured files and runs them.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut drivers = DriverRegistry::new();
        let fleet = load_vehicles(&self.config.vehicles_file)?;
        let rentals = load_rentals(&self.config.rentals_file, &fleet, &mut drivers)?;
        self.run_with(fleet, rentals, drivers).await
    }

    /// Runs already loaded rentals: writes their pricing records, simulates
    /// every batch, then serializes the vehicles that broke down.
    #[tracing::instrument(skip_all, fields(vehicles = fleet.len(), rentals = rentals.len()))]
    pub async fn run_with(
        &self,
        fleet: BTreeMap<String, Vehicle>,
        rentals: Vec<Rental>,
        drivers: DriverRegistry,
    ) -> Result<RunSummary> {
        let store = RecordStore::new(&self.config.records_dir);
        prepare_records(
            &store,
            &rentals,
            &fleet,
            &self.config.pricing,
            &self.config.bills_dir,
        );

        let broken: BTreeSet<String> = rentals
            .iter()
            .filter(|r| r.malfunction.is_reported())
            .map(|r| r.vehicle_id.clone())
            .collect();

        let grid = Arc::new(match &self.observer {
            Some(observer) => GridState::with_observer(Arc::clone(observer)),
            None => GridState::new(),
        });
        let settler = Settler::new(store, &self.config.bills_dir, Arc::new(drivers));
        let ctx = Arc::new(TaskContext {
            grid,
            settler: Arc::new(settler),
            marker_ttl: self.config.marker_ttl(),
        });
        let shared: HashMap<String, _> = fleet
            .into_iter()
            .map(|(id, vehicle)| (id, vehicle.into_shared()))
            .collect();
        let scheduler = BatchScheduler::new(shared, ctx, self.config.quiescence());

        let reports = scheduler.run(group_by_timestamp(rentals)).await;
        let mut summary = RunSummary::from_reports(&reports);

        let damaged: Vec<Vehicle> = broken
            .iter()
            .filter_map(|id| scheduler.fleet().get(id))
            .map(|v| v.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        if !damaged.is_empty() {
            match save_damaged(&self.config.damaged_dir, &damaged) {
                Ok(n) => summary.damaged_saved = n,
                Err(e) => error!(error = %e, "Failed to save damaged vehicles"),
            }
        }

        info!(
            batches = summary.batches,
            settled = summary.settled,
            failed = summary.failed,
            malfunctions = summary.malfunctions,
            revenue = summary.revenue,
            "Simulation finished"
        );
        Ok(summary)
    }
}
