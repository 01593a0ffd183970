//! relayd - camera stream relay daemon
//!
//! This daemon:
//! 1. Loads configuration and opens the camera store
//! 2. Builds the shared detection engine and result forwarder
//! 3. Runs the dispatch loop and the HTTP intake API
//! 4. On Ctrl-C: stops the API, closes the queue, cancels and joins workers

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use face_relay::{
    api::{ApiConfig, ApiServer, ApiState},
    build_classifier, DetectionEngine, DispatchLoop, HttpSink, IngestionQueue, RegistrationIntake,
    RelaydConfig, ResultForwarder, RtspOpener, SqliteCameraStore, WorkerContext,
    WorkerSupervisor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay camera streams to a face analysis service")]
struct Args {
    /// JSON or TOML config file. Env overrides still apply on top.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RelaydConfig::load_from(args.config.as_deref())?;

    let store = SqliteCameraStore::open(&config.db_path)?;
    let classifier = build_classifier(&config.detector)?;
    let engine = DetectionEngine::new(classifier);
    log::info!("detector backend: {}", engine.backend_name());

    let sink = HttpSink::new(config.upload.url.clone(), config.upload.timeout);
    log::info!("forwarding detections to {}", sink.url());
    let forwarder = ResultForwarder::new(sink).with_jpeg_quality(config.upload.jpeg_quality);

    let ctx = WorkerContext {
        opener: Arc::new(RtspOpener::new()),
        engine,
        forwarder: Arc::new(forwarder),
        stream_options: config.stream.options(),
        frame_interval: config.stream.frame_interval,
    };
    let supervisor = Arc::new(WorkerSupervisor::new(ctx));
    let queue = Arc::new(IngestionQueue::new());
    let dispatch = DispatchLoop::new(queue.clone(), supervisor.clone()).spawn()?;

    let intake = RegistrationIntake::new(queue.clone(), Box::new(store));
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: config.api_addr.clone(),
        },
        ApiState {
            intake,
            supervisor: supervisor.clone(),
        },
    )
    .spawn()?;
    log::info!(
        "relayd running. api on {}, store {}",
        api_handle.addr,
        config.db_path
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");

    api_handle.stop()?;
    queue.close();
    dispatch
        .join()
        .map_err(|_| anyhow!("dispatch thread panicked"))?;
    supervisor.cancel_all();
    if config.stream.read_timeout.is_none() {
        log::warn!("reads are unbounded; a worker blocked on a stalled stream delays shutdown");
    }
    supervisor.join_all();
    log::info!("relayd stopped");
    Ok(())
}
