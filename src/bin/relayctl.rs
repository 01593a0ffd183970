//! relayctl - command-line client for a running relayd
//!
//! Each subcommand issues one HTTP request and prints the JSON response.

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Control a running relayd")]
struct Args {
    /// Base URL of the relayd API.
    #[arg(long, env = "RELAY_SERVER", default_value = "http://localhost:5000")]
    server: String,

    /// Request timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct CameraArgs {
    /// RTSP URL of the camera stream.
    #[arg(long)]
    rtsp_url: String,
    /// Camera identifier attached to every detection.
    #[arg(long)]
    device_id: String,
    /// Event identifier attached to every detection.
    #[arg(long)]
    event_id: String,
}

impl CameraArgs {
    fn body(&self) -> Value {
        json!({
            "rtsp_url": self.rtsp_url,
            "device_id": self.device_id,
            "event_id": self.event_id,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a camera and start processing it.
    Register(CameraArgs),
    /// Start processing a camera stream.
    Start(CameraArgs),
    /// Store a camera record and start processing it.
    Add(CameraArgs),
    /// List stored camera records.
    List,
    /// Replace a stored camera record.
    Update {
        id: i64,
        #[command(flatten)]
        camera: CameraArgs,
    },
    /// Delete a stored camera record.
    Delete { id: i64 },
    /// Show the number of live stream workers.
    Threads,
    /// Show the status of every stream worker.
    Workers,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_millis(args.timeout_ms))
        .build();
    let base = args.server.trim_end_matches('/');

    let request = match &args.command {
        Command::Register(camera) => agent
            .post(&format!("{base}/register_camera"))
            .send_json(camera.body()),
        Command::Start(camera) => agent
            .post(&format!("{base}/start_processing"))
            .send_json(camera.body()),
        Command::Add(camera) => agent
            .post(&format!("{base}/cameras"))
            .send_json(camera.body()),
        Command::List => agent.get(&format!("{base}/cameras")).call(),
        Command::Update { id, camera } => agent
            .put(&format!("{base}/cameras/{id}"))
            .send_json(camera.body()),
        Command::Delete { id } => agent.delete(&format!("{base}/cameras/{id}")).call(),
        Command::Threads => agent.get(&format!("{base}/active_threads")).call(),
        Command::Workers => agent.get(&format!("{base}/workers")).call(),
    };

    let response = match request {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            return Err(anyhow!("relayd returned HTTP {code}: {body}"));
        }
        Err(err) => return Err(err).with_context(|| format!("request to {base} failed")),
    };
    let body: Value = response
        .into_json()
        .context("relayd response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
