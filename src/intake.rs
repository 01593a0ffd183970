//! Registration intake.
//!
//! Producers on the request side of the queue. `register` covers both the
//! registration and stream-start endpoints; `add_camera` also persists the
//! registration before queueing it. Validation happens before anything is
//! stored or queued, so a rejected request leaves both untouched.

use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::queue::IngestionQueue;
use crate::registration::{CameraRegistration, RegistrationRequest, ValidationError};
use crate::store::{CameraRecord, CameraStore};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("camera store failure: {0:#}")]
    Store(anyhow::Error),
    #[error("ingestion queue is closed")]
    QueueClosed,
}

pub type SharedStore = Arc<Mutex<Box<dyn CameraStore>>>;

#[derive(Clone)]
pub struct RegistrationIntake {
    queue: Arc<IngestionQueue>,
    store: SharedStore,
}

impl RegistrationIntake {
    pub fn new(queue: Arc<IngestionQueue>, store: Box<dyn CameraStore>) -> Self {
        Self {
            queue,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn queue(&self) -> &Arc<IngestionQueue> {
        &self.queue
    }

    /// Validate and enqueue.
    pub fn register(&self, request: RegistrationRequest) -> Result<CameraRegistration, IntakeError> {
        let registration = request.validate()?;
        self.enqueue(registration.clone())?;
        log::info!(
            "registered camera {} for event {}",
            registration.device_id(),
            registration.event_id()
        );
        Ok(registration)
    }

    /// Validate, persist, then enqueue. Returns the new record id.
    ///
    /// The store is held locked until the registration is queued; if the queue
    /// is closed the new record is removed again.
    pub fn add_camera(&self, request: RegistrationRequest) -> Result<i64, IntakeError> {
        let registration = request.validate()?;
        let mut store = self.lock_store()?;
        let id = store.insert(&registration).map_err(IntakeError::Store)?;
        if let Err(err) = self.enqueue(registration) {
            if let Err(rollback) = store.delete(id) {
                log::error!(
                    "failed to remove camera record {} after refused enqueue: {:#}",
                    id,
                    rollback
                );
            }
            return Err(err);
        }
        drop(store);
        log::info!("added camera record {id}");
        Ok(id)
    }

    pub fn list_cameras(&self) -> Result<Vec<CameraRecord>, IntakeError> {
        self.lock_store()?.list().map_err(IntakeError::Store)
    }

    /// Replace a stored record. Running workers are unaffected.
    pub fn update_camera(&self, id: i64, request: RegistrationRequest) -> Result<bool, IntakeError> {
        let registration = request.validate()?;
        self.lock_store()?
            .update(id, &registration)
            .map_err(IntakeError::Store)
    }

    /// Delete a stored record. Running workers are unaffected.
    pub fn delete_camera(&self, id: i64) -> Result<bool, IntakeError> {
        self.lock_store()?.delete(id).map_err(IntakeError::Store)
    }

    fn enqueue(&self, registration: CameraRegistration) -> Result<(), IntakeError> {
        self.queue
            .enqueue(registration)
            .map_err(|_| IntakeError::QueueClosed)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Box<dyn CameraStore>>, IntakeError> {
        self.store
            .lock()
            .map_err(|_| IntakeError::Store(anyhow::anyhow!("camera store lock poisoned")))
    }
}
