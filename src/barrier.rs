//! Counting completion barrier for a batch of rental tasks.
//!
//! Each task holds an [`ArrivalGuard`]; the guard arrives when it is dropped,
//! so a task counts as finished exactly once however it exits, panics
//! included.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug)]
struct Shared {
    remaining: AtomicUsize,
    released: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct CompletionBarrier {
    shared: Arc<Shared>,
}

impl CompletionBarrier {
    /// A barrier that releases after `parties` arrivals. Zero parties
    /// releases immediately.
    pub fn new(parties: usize) -> Self {
        let (released, _) = watch::channel(parties == 0);
        Self {
            shared: Arc::new(Shared {
                remaining: AtomicUsize::new(parties),
                released,
            }),
        }
    }

    pub fn guard(&self) -> ArrivalGuard {
        ArrivalGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn remaining(&self) -> usize {
        self.shared.remaining.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        *self.shared.released.borrow()
    }

    /// Waits until every party has arrived.
    pub async fn wait(&self) {
        let mut rx = self.shared.released.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|released| *released).await;
    }
}

/// Arrives at its barrier when dropped.
#[derive(Debug)]
pub struct ArrivalGuard {
    shared: Arc<Shared>,
}

impl Drop for ArrivalGuard {
    fn drop(&mut self) {
        let previous = self
            .shared
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                self.shared.released.send_replace(true);
            }
            Ok(_) => {}
            Err(_) => warn!("Arrival at an already released barrier"),
        }
    }
}
