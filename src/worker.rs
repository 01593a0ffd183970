//! Per-camera stream worker.
//!
//! A `StreamWorker` owns one frame source for one registration and runs
//! `Opening -> Streaming -> Terminated` on its own thread:
//!
//! 1. Open the stream with the transport hints. Failure terminates at once.
//! 2. For every frame: wait the frame interval, detect, forward each region.
//! 3. End of stream, a read error or cancellation terminates.
//!
//! There is no retry edge. Per-frame and per-region failures are contained
//! here and never reach the dispatch loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::detect::DetectionEngine;
use crate::forward::ResultForwarder;
use crate::ingest::{stream_url, StreamOpener, StreamOptions};
use crate::registration::CameraRegistration;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Cancellation
// ----------------------------------------------------------------------------

/// Cooperative stop signal shared between a worker and its supervisor.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep for `duration` unless cancelled first. Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

// ----------------------------------------------------------------------------
// Observable state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Opening,
    Streaming,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    OpenFailed,
    EndOfStream,
    ReadFailed,
    Cancelled,
    Panicked,
}

/// Snapshot of one worker, as served by the introspection endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
    pub id: u64,
    pub device_id: String,
    pub event_id: String,
    pub state: WorkerState,
    pub termination: Option<Termination>,
    pub frames_processed: u64,
    pub regions_detected: u64,
    pub uploads_delivered: u64,
    pub uploads_failed: u64,
}

/// Live status of one worker, written by the worker and read by the supervisor.
pub struct WorkerProbe {
    id: u64,
    device_id: String,
    event_id: String,
    phase: Mutex<(WorkerState, Option<Termination>)>,
    frames_processed: AtomicU64,
    regions_detected: AtomicU64,
    uploads_delivered: AtomicU64,
    uploads_failed: AtomicU64,
}

impl WorkerProbe {
    pub fn new(id: u64, registration: &CameraRegistration) -> Self {
        Self {
            id,
            device_id: registration.device_id().to_string(),
            event_id: registration.event_id().to_string(),
            phase: Mutex::new((WorkerState::Opening, None)),
            frames_processed: AtomicU64::new(0),
            regions_detected: AtomicU64::new(0),
            uploads_delivered: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.phase.lock().unwrap_or_else(|p| p.into_inner()).0
    }

    pub fn snapshot(&self) -> WorkerStatus {
        let (state, termination) = *self.phase.lock().unwrap_or_else(|p| p.into_inner());
        WorkerStatus {
            id: self.id,
            device_id: self.device_id.clone(),
            event_id: self.event_id.clone(),
            state,
            termination,
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            regions_detected: self.regions_detected.load(Ordering::Relaxed),
            uploads_delivered: self.uploads_delivered.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
        }
    }

    fn enter(&self, state: WorkerState) {
        self.phase.lock().unwrap_or_else(|p| p.into_inner()).0 = state;
    }

    /// Terminated is final; later calls keep the first reason.
    pub(crate) fn terminate(&self, reason: Termination) {
        let mut phase = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if phase.0 != WorkerState::Terminated {
            *phase = (WorkerState::Terminated, Some(reason));
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Everything a worker needs besides its registration. Cloned per worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub opener: Arc<dyn StreamOpener>,
    pub engine: DetectionEngine,
    pub forwarder: Arc<ResultForwarder>,
    pub stream_options: StreamOptions,
    pub frame_interval: Duration,
}

pub struct StreamWorker {
    registration: CameraRegistration,
    ctx: WorkerContext,
    probe: Arc<WorkerProbe>,
    cancel: CancelToken,
}

impl StreamWorker {
    pub fn new(
        registration: CameraRegistration,
        ctx: WorkerContext,
        probe: Arc<WorkerProbe>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            registration,
            ctx,
            probe,
            cancel,
        }
    }

    /// Run to completion on the calling thread.
    pub fn run(self) -> Termination {
        let reason = self.run_inner();
        self.probe.terminate(reason);
        log::info!(
            "worker {} for camera {} terminated: {:?}",
            self.probe.id(),
            self.registration.device_id(),
            reason
        );
        reason
    }

    fn run_inner(&self) -> Termination {
        let device_id = self.registration.device_id();
        let event_id = self.registration.event_id();
        let url = stream_url(self.registration.rtsp_url(), &self.ctx.stream_options);

        let mut source = match self.ctx.opener.open(&url, &self.ctx.stream_options) {
            Ok(source) => source,
            Err(err) => {
                log::error!("unable to open camera with URL {}: {:#}", url, err);
                return Termination::OpenFailed;
            }
        };
        self.probe.enter(WorkerState::Streaming);
        log::info!("camera {} streaming (event {})", device_id, event_id);

        loop {
            if self.cancel.is_cancelled() {
                return Termination::Cancelled;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("camera {} reached end of stream", device_id);
                    return Termination::EndOfStream;
                }
                Err(err) => {
                    log::warn!("failed to grab frame from camera {}: {:#}", device_id, err);
                    return Termination::ReadFailed;
                }
            };

            if self.cancel.sleep(self.ctx.frame_interval) {
                return Termination::Cancelled;
            }

            let regions = match self.ctx.engine.detect(&frame) {
                Ok(regions) => regions,
                Err(err) => {
                    log::warn!(
                        "detection failed on frame {} from camera {}: {:#}",
                        frame.sequence,
                        device_id,
                        err
                    );
                    self.probe.frames_processed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            drop(frame);

            let report = self.ctx.forwarder.forward_all(&regions, device_id, event_id);
            self.probe.frames_processed.fetch_add(1, Ordering::Relaxed);
            self.probe
                .regions_detected
                .fetch_add(regions.len() as u64, Ordering::Relaxed);
            self.probe
                .uploads_delivered
                .fetch_add(report.delivered as u64, Ordering::Relaxed);
            self.probe
                .uploads_failed
                .fetch_add(report.failed() as u64, Ordering::Relaxed);
        }
    }
}
