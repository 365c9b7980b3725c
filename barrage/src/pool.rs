//! Bounded set of reusable worker slots.
//!
//! A slot is held for the whole of one iteration (arrival-rate) or for the lifetime of a looping
//! worker (fixed-concurrency). Dropping the slot returns it to the pool.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all {capacity} workers are busy")]
pub struct PoolExhaustedError {
    pub capacity: usize,
}

#[derive(Debug)]
struct Shared {
    semaphore: Arc<Semaphore>,
    free_ids: Mutex<Vec<usize>>,
}

impl Shared {
    fn take_id(&self) -> usize {
        let mut ids = self.free_ids.lock().unwrap_or_else(PoisonError::into_inner);
        // A permit guarantees an id is available.
        ids.pop().unwrap_or_default()
    }

    fn give_id(&self, id: usize) {
        self.free_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(capacity)),
                free_ids: Mutex::new((0..capacity).rev().collect()),
            }),
            capacity,
        }
    }

    /// Waits up to `timeout` for a free worker.
    pub async fn acquire(&self, timeout: Duration) -> Result<WorkerSlot, PoolExhaustedError> {
        let semaphore = self.shared.semaphore.clone();
        match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.slot(permit)),
            _ => Err(self.exhausted()),
        }
    }

    /// Takes a free worker without waiting.
    pub fn try_acquire(&self) -> Result<WorkerSlot, PoolExhaustedError> {
        match self.shared.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.slot(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => Err(self.exhausted()),
        }
    }

    /// Returns a worker to the pool. Equivalent to dropping the slot.
    pub fn release(&self, slot: WorkerSlot) {
        drop(slot)
    }

    pub fn available(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    pub fn busy(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuses further acquisitions. Slots already handed out stay valid.
    pub fn close(&self) {
        self.shared.semaphore.close();
    }

    fn slot(&self, permit: OwnedSemaphorePermit) -> WorkerSlot {
        let id = self.shared.take_id();
        trace!("Worker {id} acquired; {} free.", self.available());
        WorkerSlot {
            id,
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    fn exhausted(&self) -> PoolExhaustedError {
        PoolExhaustedError {
            capacity: self.capacity,
        }
    }
}

/// Exclusive claim on one worker.
#[derive(Debug)]
pub struct WorkerSlot {
    id: usize,
    shared: Arc<Shared>,
    // NOTE: Dropped after `drop` below runs, so the id is back in the list before the permit is.
    _permit: OwnedSemaphorePermit,
}

impl WorkerSlot {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.shared.give_id(self.id);
    }
}
