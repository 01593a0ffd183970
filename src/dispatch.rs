//! Dispatch loop and worker supervision.
//!
//! `DispatchLoop` drains the `IngestionQueue` on a dedicated thread and hands
//! each registration to `WorkerSupervisor::launch`, which starts one
//! `StreamWorker` thread and returns without waiting on it.
//!
//! The supervisor keeps the live-worker count for introspection. The count is
//! incremented before a worker thread starts and decremented by a guard when the
//! thread ends, so panicking workers are counted out too. Terminated workers
//! are reaped from the status list on the next launch.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use crate::queue::IngestionQueue;
use crate::registration::CameraRegistration;
use crate::worker::{
    CancelToken, StreamWorker, Termination, WorkerContext, WorkerProbe, WorkerState, WorkerStatus,
};

struct WorkerEntry {
    probe: Arc<WorkerProbe>,
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl WorkerEntry {
    fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |j| j.is_finished())
    }
}

/// Decrements the live count when the worker thread exits, by any path.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WorkerSupervisor {
    ctx: WorkerContext,
    workers: Mutex<Vec<WorkerEntry>>,
    live: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl WorkerSupervisor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            workers: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start one worker for `registration`. Returns its id once the thread
    /// is running; never waits for the worker to make progress.
    pub fn launch(&self, registration: CameraRegistration) -> Result<u64> {
        self.reap();

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::new(WorkerProbe::new(id, &registration));
        let cancel = CancelToken::new();
        let device_id = registration.device_id().to_string();

        let worker = StreamWorker::new(
            registration,
            self.ctx.clone(),
            probe.clone(),
            cancel.clone(),
        );
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(self.live.clone());
        let thread_probe = probe.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("worker-{id}-{}", device_id.replace('\0', "")))
            .spawn(move || {
                let _guard = guard;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run()));
                if outcome.is_err() {
                    log::error!("worker {} panicked", thread_probe.id());
                    thread_probe.terminate(Termination::Panicked);
                }
            });
        // A failed spawn drops the closure, and with it the guard.
        let join = spawned.with_context(|| format!("spawn worker for camera {device_id}"))?;

        log::info!("dispatched worker {} for camera {}", id, device_id);
        self.lock().push(WorkerEntry {
            probe,
            cancel,
            join: Some(join),
        });
        Ok(id)
    }

    /// Number of worker threads currently alive.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Status of every worker not yet reaped, in launch order.
    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.lock().iter().map(|w| w.probe.snapshot()).collect()
    }

    pub fn status(&self, id: u64) -> Option<WorkerStatus> {
        self.lock()
            .iter()
            .find(|w| w.probe.id() == id)
            .map(|w| w.probe.snapshot())
    }

    /// Signal every worker to stop.
    pub fn cancel_all(&self) {
        for worker in self.lock().iter() {
            worker.cancel.cancel();
        }
    }

    /// Wait for every worker thread to exit.
    pub fn join_all(&self) {
        let joins: Vec<JoinHandle<()>> = self
            .lock()
            .iter_mut()
            .filter_map(|w| w.join.take())
            .collect();
        for join in joins {
            let _ = join.join();
        }
    }

    /// Drop bookkeeping for workers whose threads have exited.
    pub fn reap(&self) -> usize {
        let mut workers = self.lock();
        let before = workers.len();
        workers.retain(|w| !(w.is_finished() && w.probe.state() == WorkerState::Terminated));
        before - workers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerEntry>> {
        self.workers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Starts one worker per registration without waiting on it.
pub trait WorkerLauncher: Send + Sync {
    /// Returns the new worker's id.
    fn launch(&self, registration: CameraRegistration) -> Result<u64>;
}

impl WorkerLauncher for WorkerSupervisor {
    fn launch(&self, registration: CameraRegistration) -> Result<u64> {
        WorkerSupervisor::launch(self, registration)
    }
}

/// Single consumer of the ingestion queue.
pub struct DispatchLoop {
    queue: Arc<IngestionQueue>,
    launcher: Arc<dyn WorkerLauncher>,
}

impl DispatchLoop {
    pub fn new(queue: Arc<IngestionQueue>, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { queue, launcher }
    }

    /// Dequeue one registration (blocking) and launch its worker.
    ///
    /// Returns `None` once the queue is closed and drained. Launch failures,
    /// including panics, are logged and reported as `Some(Err(_))`.
    pub fn dispatch_next(&self) -> Option<Result<u64>> {
        let registration = self.queue.dequeue()?;
        let device_id = registration.device_id().to_string();
        let launcher = &self.launcher;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| launcher.launch(registration)))
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!("panic while launching worker for camera {device_id}")),
        };
        if let Err(err) = &result {
            log::error!("dispatch failed: {:#}", err);
        }
        Some(result)
    }

    /// Dispatch until the queue is closed.
    pub fn run(&self) {
        while self.dispatch_next().is_some() {}
        log::info!("dispatch loop stopped: ingestion queue closed");
    }

    /// Run the loop on its own thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || self.run())
            .context("spawn dispatch loop")
    }
}
