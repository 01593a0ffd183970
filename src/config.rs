use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::forward::DEFAULT_JPEG_QUALITY;
use crate::ingest::{StreamOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use crate::worker::DEFAULT_FRAME_INTERVAL;

const DEFAULT_DB_PATH: &str = "cameras.db";
const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_WIDTH: u32 = 320;
const DEFAULT_INPUT_HEIGHT: u32 = 240;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DEFAULT_UPLOAD_URL: &str = "https://emotion-detection-app-v3-bw5vqucpuq-ww.a.run.app";
const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Deserialize, Default)]
struct RelaydConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    frame_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RelaydConfig {
    pub db_path: String,
    pub api_addr: String,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub connect_timeout: Duration,
    /// `None` waits forever for the next frame.
    pub read_timeout: Option<Duration>,
    pub frame_interval: Duration,
}

impl StreamSettings {
    pub fn options(&self) -> StreamOptions {
        StreamOptions {
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: None,
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub url: String,
    pub timeout: Duration,
    pub jpeg_quality: u8,
}

impl RelaydConfig {
    /// Load from the file named by `RELAY_CONFIG` (if any), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelaydConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            connect_timeout: stream_file
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: match stream_file.read_timeout_ms {
                Some(ms) => read_timeout_from_ms(ms),
                None => Some(DEFAULT_READ_TIMEOUT),
            },
            frame_interval: stream_file
                .frame_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FRAME_INTERVAL),
        };

        let defaults = DetectorSettings::default();
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            model_path: detector_file.model_path,
            input_width: detector_file.input_width.unwrap_or(defaults.input_width),
            input_height: detector_file.input_height.unwrap_or(defaults.input_height),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
        };

        let upload_file = file.upload.unwrap_or_default();
        let upload = UploadSettings {
            url: upload_file
                .url
                .unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
            timeout: Duration::from_millis(
                upload_file.timeout_ms.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_MS),
            ),
            jpeg_quality: upload_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        Self {
            db_path,
            api_addr,
            stream,
            detector,
            upload,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("RELAY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = non_empty_env("RELAY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(ms) = millis_env("RELAY_CONNECT_TIMEOUT_MS")? {
            self.stream.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = millis_env("RELAY_READ_TIMEOUT_MS")? {
            self.stream.read_timeout = read_timeout_from_ms(ms);
        }
        if let Some(ms) = millis_env("RELAY_FRAME_INTERVAL_MS")? {
            self.stream.frame_interval = Duration::from_millis(ms);
        }
        if let Some(backend) = non_empty_env("RELAY_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("RELAY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty_env("RELAY_UPLOAD_URL") {
            self.upload.url = url;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();

        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.api_addr.trim().is_empty() {
            return Err(anyhow!("api.addr must not be empty"));
        }
        if self.stream.connect_timeout.is_zero() {
            return Err(anyhow!("stream.connect_timeout_ms must be greater than zero"));
        }
        if self.stream.frame_interval.is_zero() {
            return Err(anyhow!("stream.frame_interval_ms must be greater than zero"));
        }
        let url = self.upload.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("upload.url must be an http(s) URL, got {url:?}"));
        }
        if self.upload.timeout.is_zero() {
            return Err(anyhow!("upload.timeout_ms must be greater than zero"));
        }
        if !(1..=100).contains(&self.upload.jpeg_quality) {
            return Err(anyhow!("upload.jpeg_quality must be between 1 and 100"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!(
                "detector.confidence_threshold must be between 0 and 1"
            ));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be non-zero"));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector backend 'tract' requires detector.model_path"));
        }
        Ok(())
    }
}

fn read_timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn millis_env(name: &str) -> Result<Option<u64>> {
    match non_empty_env(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{name} must be an integer number of milliseconds")),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<RelaydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
