//! Camera stream relay.
//!
//! Accepts camera registrations over HTTP, runs one stream worker per
//! registration, detects faces in sampled frames and forwards every detected
//! region to a remote analysis service.
//!
//! # Architecture
//!
//! ```text
//! intake ──enqueue──> IngestionQueue ──dequeue──> DispatchLoop
//!                                                     │ launch (never waits)
//!                                                     v
//!                        StreamWorker: open ─> (interval, detect, forward)*
//! ```
//!
//! The queue decouples request handling from worker startup. Workers share
//! one detection engine and one forwarder and never talk to each other.
//!
//! # Module Structure
//!
//! - `registration`, `queue`, `intake`, `store`: request side
//! - `ingest`, `frame`, `detect`, `forward`: per-frame pipeline
//! - `worker`, `dispatch`: stream lifecycle and supervision
//! - `api`, `config`: HTTP surface and daemon configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod forward;
pub mod frame;
pub mod ingest;
pub mod intake;
pub mod queue;
pub mod registration;
pub mod store;
pub mod worker;

pub use api::{ApiConfig, ApiHandle, ApiServer, ApiState};
pub use config::RelaydConfig;
pub use detect::{build_classifier, DetectionEngine, FaceClassifier, StubClassifier};
pub use dispatch::{DispatchLoop, WorkerLauncher, WorkerSupervisor};
pub use forward::{DetectionEvent, DetectionSink, HttpSink, ResultForwarder};
pub use frame::{BoundingBox, Frame, RegionOfInterest};
pub use ingest::{FrameSource, RtspOpener, StreamOpener, StreamOptions};
pub use intake::{IntakeError, RegistrationIntake};
pub use queue::IngestionQueue;
pub use registration::{CameraRegistration, RegistrationRequest, ValidationError};
pub use store::{CameraRecord, CameraStore, InMemoryCameraStore, SqliteCameraStore};
pub use worker::{
    CancelToken, StreamWorker, Termination, WorkerContext, WorkerProbe, WorkerState, WorkerStatus,
};
