//! HTTP intake and introspection.
//!
//! A single listener thread serves JSON requests one connection at a time.
//! Handlers are thin adapters over `RegistrationIntake` and the
//! `WorkerSupervisor`; none of them wait on a worker.

mod http;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::dispatch::WorkerSupervisor;
use crate::intake::{IntakeError, RegistrationIntake};
use crate::registration::RegistrationRequest;

use self::http::{read_request, write_json_response, write_response, HttpRequest, ReadError};

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
        }
    }
}

/// Shared state for the request handlers.
#[derive(Clone)]
pub struct ApiState {
    pub intake: RegistrationIntake,
    pub supervisor: Arc<WorkerSupervisor>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state, shutdown_thread) {
                    log::error!("relay api stopped: {}", err);
                }
            })?;
        log::info!("relay api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &state) {
                    log::warn!("relay api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(ReadError::TooLarge) => {
            write_json_response(&mut stream, 413, r#"{"error":"request_too_large"}"#)?;
            discard_input(&mut stream);
            return Ok(());
        }
        Err(ReadError::Malformed(err)) => {
            let _ = write_json_response(&mut stream, 400, r#"{"error":"bad_request"}"#);
            return Err(err);
        }
    };
    let (status, body) = route(&request, state);
    write_response(&mut stream, status, "application/json", &body)
}

/// Shut down writes and drain unread input so the close is a FIN, not a reset.
fn discard_input(stream: &mut TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
    let mut buf = [0u8; 4096];
    let mut remaining: usize = 1024 * 1024;
    while remaining > 0 {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => remaining = remaining.saturating_sub(n),
        }
    }
}

type Response = (u16, Vec<u8>);

fn route(request: &HttpRequest, state: &ApiState) -> Response {
    let method = request.method.as_str();
    let path = request.path.trim_end_matches('/');
    match path {
        "/health" => match method {
            "GET" => json_body(200, &json!({"status": "ok"})),
            _ => method_not_allowed(),
        },
        "/register_camera" => match method {
            "POST" => register(request, state, "Camera registered"),
            _ => method_not_allowed(),
        },
        "/start_processing" => match method {
            "POST" => register(request, state, "Processing started"),
            _ => method_not_allowed(),
        },
        "/cameras" => match method {
            "GET" => match state.intake.list_cameras() {
                Ok(records) => json_body(200, &records),
                Err(err) => intake_error(err),
            },
            "POST" => add_camera(request, state),
            _ => method_not_allowed(),
        },
        "/active_threads" => match method {
            "GET" => json_body(
                200,
                &json!({"active_threads": state.supervisor.live_count()}),
            ),
            _ => method_not_allowed(),
        },
        "/workers" => match method {
            "GET" => json_body(200, &state.supervisor.statuses()),
            _ => method_not_allowed(),
        },
        _ => match path.strip_prefix("/cameras/") {
            Some(raw_id) => camera_by_id(request, state, raw_id),
            None => json_body(404, &json!({"error": "not_found"})),
        },
    }
}

fn register(request: &HttpRequest, state: &ApiState, message: &str) -> Response {
    let body = match parse_registration(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    match state.intake.register(body) {
        Ok(_) => json_body(200, &json!({"message": message})),
        Err(err) => intake_error(err),
    }
}

fn add_camera(request: &HttpRequest, state: &ApiState) -> Response {
    let body = match parse_registration(request) {
        Ok(body) => body,
        Err(response) => return response,
    };
    match state.intake.add_camera(body) {
        Ok(id) => json_body(
            201,
            &json!({"message": "Camera added and processing started", "id": id}),
        ),
        Err(err) => intake_error(err),
    }
}

fn camera_by_id(request: &HttpRequest, state: &ApiState, raw_id: &str) -> Response {
    let Ok(id) = raw_id.parse::<i64>() else {
        return json_body(400, &json!({"error": "invalid_id"}));
    };
    let result = match request.method.as_str() {
        "PUT" => match parse_registration(request) {
            Ok(body) => state.intake.update_camera(id, body),
            Err(response) => return response,
        },
        "DELETE" => state.intake.delete_camera(id),
        _ => return method_not_allowed(),
    };
    match result {
        Ok(true) if request.method == "PUT" => {
            json_body(200, &json!({"message": "Camera updated successfully"}))
        }
        Ok(true) => json_body(200, &json!({"message": "Camera deleted successfully"})),
        Ok(false) => json_body(404, &json!({"error": "camera_not_found"})),
        Err(err) => intake_error(err),
    }
}

fn parse_registration(request: &HttpRequest) -> Result<RegistrationRequest, Response> {
    serde_json::from_slice(&request.body)
        .map_err(|_| json_body(400, &json!({"error": "invalid_json"})))
}

fn intake_error(err: IntakeError) -> Response {
    match err {
        IntakeError::Validation(err) => json_body(
            400,
            &json!({"error": "validation", "detail": err.to_string()}),
        ),
        IntakeError::QueueClosed => json_body(503, &json!({"error": "shutting_down"})),
        IntakeError::Store(err) => {
            log::error!("camera store request failed: {:#}", err);
            json_body(500, &json!({"error": "store"}))
        }
    }
}

fn method_not_allowed() -> Response {
    json_body(405, &json!({"error": "method_not_allowed"}))
}

fn json_body<T: Serialize + ?Sized>(status: u16, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(err) => {
            log::error!("failed to encode api response: {}", err);
            (500, br#"{"error":"internal"}"#.to_vec())
        }
    }
}
