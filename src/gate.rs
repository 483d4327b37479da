use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds the number of executions in flight.
///
/// Waiting has no timeout and no priority. Whoever the semaphore wakes next
/// goes next; arrival order is not promised.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    max_outstanding: usize,
}

/// Held for the duration of one execution; dropping it frees the slot
#[derive(Debug)]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(max_outstanding: usize) -> Self {
        assert!(max_outstanding > 0, "max_outstanding must not be 0");
        Self {
            slots: Arc::new(Semaphore::new(max_outstanding)),
            max_outstanding,
        }
    }

    pub async fn acquire(&self) -> AdmissionToken {
        // The semaphore is never closed, so acquiring cannot fail
        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("admission semaphore closed"),
        };
        AdmissionToken { _permit: permit }
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    pub fn in_flight(&self) -> usize {
        self.max_outstanding - self.slots.available_permits()
    }
}
