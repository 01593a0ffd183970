//! Ingestion queue between the intake endpoints and the dispatch loop.
//!
//! Unbounded FIFO: `enqueue` never blocks, `dequeue` blocks until an item is
//! available. No backpressure is applied.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::registration::CameraRegistration;

#[derive(Default)]
struct QueueState {
    items: VecDeque<CameraRegistration>,
    closed: bool,
}

#[derive(Default)]
pub struct IngestionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl IngestionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration. Only fails once the queue has been closed, in
    /// which case the registration is handed back.
    pub fn enqueue(&self, registration: CameraRegistration) -> Result<(), CameraRegistration> {
        let mut state = self.lock();
        if state.closed {
            return Err(registration);
        }
        state.items.push_back(registration);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Block until a registration is available. Returns `None` once the queue
    /// is closed and drained.
    pub fn dequeue(&self) -> Option<CameraRegistration> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further registrations and wake the consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
