//! Shared city grid: which vehicles occupy which cell.
//!
//! [`GridState`] is mutated concurrently by every rental task of a batch.
//! Each vehicle's current cell is tracked explicitly, so moving a vehicle
//! never has to guess its previous occupant label. Every mutation is
//! reported to an optional [`GridObserver`] after the lock is released.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Rows and columns of the city grid.
pub const GRID_DIMENSION: u8 = 20;

/// A grid cell, addressed by row then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub row: u8,
    pub col: u8,
}

impl Cell {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// `true` if both axes lie in `[min, max]`.
    pub fn is_within(&self, min: u8, max: u8) -> bool {
        (min..=max).contains(&self.row) && (min..=max).contains(&self.col)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Label shown for a vehicle in a cell, e.g. `A1-97`.
pub fn occupant_label(vehicle_id: &str, battery: u8) -> String {
    format!("{vehicle_id}-{battery}")
}

/// A change to the grid, as seen by renderers.
#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    Moved {
        cell: Cell,
        vehicle_id: String,
        battery: u8,
        from: Option<Cell>,
    },
    Marked {
        cell: Cell,
        label: String,
        expires_in: Duration,
    },
    Expired {
        cell: Cell,
        label: String,
    },
    Cleared,
}

/// Receives grid events. Implementations must return quickly.
pub trait GridObserver: Send + Sync {
    fn on_event(&self, event: &GridEvent);
}

/// Forwards grid events into an unbounded channel.
pub struct ChannelObserver(mpsc::UnboundedSender<GridEvent>);

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GridEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl GridObserver for ChannelObserver {
    fn on_event(&self, event: &GridEvent) {
        // Receiver gone means nobody is rendering anymore.
        let _ = self.0.send(event.clone());
    }
}

#[derive(Debug, Default)]
struct GridInner {
    cells: HashMap<Cell, Vec<String>>,
    positions: HashMap<String, (Cell, String)>,
}

impl GridInner {
    fn insert(&mut self, cell: Cell, label: String) {
        let occupants = self.cells.entry(cell).or_default();
        if !occupants.contains(&label) {
            occupants.push(label);
        }
    }

    fn remove(&mut self, cell: Cell, label: &str) -> bool {
        let Some(occupants) = self.cells.get_mut(&cell) else {
            return false;
        };
        let before = occupants.len();
        occupants.retain(|l| l != label);
        let removed = occupants.len() != before;
        if occupants.is_empty() {
            self.cells.remove(&cell);
        }
        removed
    }
}

#[derive(Default)]
pub struct GridState {
    inner: Mutex<GridInner>,
    observer: Option<Arc<dyn GridObserver>>,
}

impl GridState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn GridObserver>) -> Self {
        Self {
            inner: Mutex::default(),
            observer: Some(observer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GridInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: GridEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Moves `vehicle_id` into `cell` with a fresh battery label.
    ///
    /// The vehicle's previous occupant entry, if any, is removed first and
    /// its cell pruned when it becomes empty. Returns the previous cell.
    pub fn move_to(&self, cell: Cell, vehicle_id: &str, battery: u8) -> Option<Cell> {
        let label = occupant_label(vehicle_id, battery);
        let from = {
            let mut inner = self.lock();
            let previous = inner.positions.remove(vehicle_id);
            if let Some((old_cell, old_label)) = &previous {
                inner.remove(*old_cell, old_label);
            }
            inner.insert(cell, label.clone());
            inner
                .positions
                .insert(vehicle_id.to_string(), (cell, label));
            previous.map(|(old_cell, _)| old_cell)
        };

        self.notify(GridEvent::Moved {
            cell,
            vehicle_id: vehicle_id.to_string(),
            battery,
            from,
        });
        from
    }

    /// Shows `label` in `cell` for `ttl`, then removes it.
    ///
    /// Ephemeral labels are not tracked as vehicle positions. The returned
    /// handle resolves once the label has expired.
    pub fn place_ephemeral(self: &Arc<Self>, cell: Cell, label: String, ttl: Duration) -> JoinHandle<()> {
        self.lock().insert(cell, label.clone());
        self.notify(GridEvent::Marked {
            cell,
            label: label.clone(),
            expires_in: ttl,
        });

        let grid = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let removed = grid.lock().remove(cell, &label);
            if removed {
                grid.notify(GridEvent::Expired { cell, label });
            } else {
                debug!(%cell, %label, "Ephemeral label already gone");
            }
        })
    }

    /// Empties the whole grid, including known vehicle positions.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.cells.clear();
            inner.positions.clear();
        }
        self.notify(GridEvent::Cleared);
    }

    pub fn occupants(&self, cell: Cell) -> Vec<String> {
        self.lock().cells.get(&cell).cloned().unwrap_or_default()
    }

    /// Current cell of `vehicle_id`; `None` if it has not moved yet.
    pub fn position_of(&self, vehicle_id: &str) -> Option<Cell> {
        self.lock().positions.get(vehicle_id).map(|(cell, _)| *cell)
    }

    pub fn occupied_cells(&self) -> usize {
        self.lock().cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().cells.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<Cell, Vec<String>> {
        self.lock()
            .cells
            .iter()
            .map(|(cell, labels)| (*cell, labels.clone()))
            .collect()
    }

    /// Text rendering of the grid: `.` for empty cells, occupant count otherwise.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for row in 0..GRID_DIMENSION {
            for col in 0..GRID_DIMENSION {
                match snapshot.get(&Cell::new(row, col)) {
                    Some(labels) => out.push_str(&format!("{:>3}", labels.len())),
                    None => out.push_str("  ."),
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<GridEvent>>);

    impl GridObserver for Recorder {
        fn on_event(&self, event: &GridEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_first_move_has_no_previous_position() {
        let grid = GridState::new();
        assert_eq!(grid.position_of("A1"), None);

        let from = grid.move_to(Cell::new(3, 4), "A1", 99);

        assert_eq!(from, None);
        assert_eq!(grid.occupants(Cell::new(3, 4)), vec!["A1-99"]);
        assert_eq!(grid.position_of("A1"), Some(Cell::new(3, 4)));
    }

    #[test]
    fn test_move_prunes_empty_cell() {
        let grid = GridState::new();
        grid.move_to(Cell::new(0, 0), "A1", 99);
        let from = grid.move_to(Cell::new(0, 1), "A1", 98);

        assert_eq!(from, Some(Cell::new(0, 0)));
        assert!(grid.occupants(Cell::new(0, 0)).is_empty());
        assert_eq!(grid.occupants(Cell::new(0, 1)), vec!["A1-98"]);
        assert_eq!(grid.occupied_cells(), 1);
    }

    #[test]
    fn test_move_leaves_other_vehicles_in_place() {
        let grid = GridState::new();
        let a = Cell::new(5, 5);
        let b = Cell::new(5, 6);
        grid.move_to(a, "B1", 90);
        grid.move_to(a, "A1", 99);

        grid.move_to(b, "A1", 98);

        assert_eq!(grid.occupants(a), vec!["B1-90"]);
        assert_eq!(grid.occupants(b), vec!["A1-98"]);
    }

    #[test]
    fn test_battery_floor_repeats_do_not_lose_track() {
        // At the battery floor the label stays the same between steps.
        let grid = GridState::new();
        grid.move_to(Cell::new(1, 1), "S1", 5);
        grid.move_to(Cell::new(1, 2), "S1", 5);

        assert!(grid.occupants(Cell::new(1, 1)).is_empty());
        assert_eq!(grid.occupants(Cell::new(1, 2)), vec!["S1-5"]);
    }

    #[test]
    fn test_clear_empties_cells_and_positions() {
        let grid = GridState::new();
        grid.move_to(Cell::new(2, 2), "A1", 99);
        grid.move_to(Cell::new(7, 2), "B1", 99);

        grid.clear();

        assert!(grid.is_empty());
        assert_eq!(grid.position_of("A1"), None);
    }

    #[test]
    fn test_observer_sees_every_mutation() {
        let recorder = Arc::new(Recorder::default());
        let grid = GridState::with_observer(recorder.clone());

        grid.move_to(Cell::new(0, 0), "A1", 99);
        grid.move_to(Cell::new(1, 0), "A1", 98);
        grid.clear();

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            GridEvent::Moved {
                cell: Cell::new(1, 0),
                vehicle_id: "A1".to_string(),
                battery: 98,
                from: Some(Cell::new(0, 0)),
            }
        );
        assert_eq!(events[2], GridEvent::Cleared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_label_expires() {
        let (observer, mut rx) = ChannelObserver::new();
        let grid = Arc::new(GridState::with_observer(Arc::new(observer)));
        let cell = Cell::new(4, 4);
        grid.move_to(cell, "B1", 80);

        let handle = grid.place_ephemeral(cell, "A1-100".to_string(), Duration::from_secs(2));
        assert_eq!(grid.occupants(cell), vec!["B1-80", "A1-100"]);

        handle.await.unwrap();

        assert_eq!(grid.occupants(cell), vec!["B1-80"]);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(GridEvent::Expired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_label_prunes_cell() {
        let grid = Arc::new(GridState::new());
        let cell = Cell::new(9, 9);

        grid.place_ephemeral(cell, "S1-100".to_string(), Duration::from_secs(2))
            .await
            .unwrap();

        assert!(grid.is_empty());
    }

    #[test]
    fn test_concurrent_moves_for_different_vehicles() {
        let grid = Arc::new(GridState::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let grid = Arc::clone(&grid);
                std::thread::spawn(move || {
                    let id = format!("V{i}");
                    for col in 0..GRID_DIMENSION {
                        grid.move_to(Cell::new(i, col), &id, 100 - col);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(grid.occupied_cells(), 8);
        for i in 0..8u8 {
            assert_eq!(grid.position_of(&format!("V{i}")), Some(Cell::new(i, 19)));
        }
    }

    #[test]
    fn test_render_shape() {
        let grid = GridState::new();
        grid.move_to(Cell::new(0, 0), "A1", 99);
        let text = grid.render();
        assert_eq!(text.lines().count(), GRID_DIMENSION as usize);
        assert!(text.starts_with("  1"));
    }

    #[test]
    fn test_cell_within_range() {
        assert!(Cell::new(5, 14).is_within(5, 14));
        assert!(!Cell::new(4, 14).is_within(5, 14));
        assert_eq!(Cell::new(3, 7).to_string(), "3,7");
    }
}
