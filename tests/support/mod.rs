//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use face_relay::detect::{ClassifierInput, ColorSpace, FaceClassifier};
use face_relay::{
    BoundingBox, DetectionEngine, DetectionEvent, DetectionSink, Frame, FrameSource,
    ResultForwarder, StreamOpener, StreamOptions, WorkerContext,
};

/// What a fake stream does once opened.
#[derive(Clone, Copy, Debug)]
pub enum StreamPlan {
    FailOpen,
    PanicOnOpen,
    Frames(u64),
    /// `n` good frames, then a read error.
    FailAfter(u64),
    Endless,
}

/// Opener whose behaviour is chosen per URL.
pub struct FakeOpener {
    plan: Box<dyn Fn(&str) -> StreamPlan + Send + Sync>,
    opened: Mutex<Vec<String>>,
}

impl FakeOpener {
    pub fn new(plan: impl Fn(&str) -> StreamPlan + Send + Sync + 'static) -> Self {
        Self {
            plan: Box::new(plan),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn always(plan: StreamPlan) -> Self {
        Self::new(move |_| plan)
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl StreamOpener for FakeOpener {
    fn open(&self, url: &str, _options: &StreamOptions) -> Result<Box<dyn FrameSource>> {
        self.opened.lock().unwrap().push(url.to_string());
        match (self.plan)(url) {
            StreamPlan::FailOpen => Err(anyhow!("connection refused")),
            StreamPlan::PanicOnOpen => panic!("decoder crashed opening {url}"),
            StreamPlan::Frames(n) => Ok(Box::new(ScriptedSource::new(Some(n)))),
            StreamPlan::FailAfter(n) => Ok(Box::new(ScriptedSource::new(Some(n)).failing())),
            StreamPlan::Endless => Ok(Box::new(ScriptedSource::new(None))),
        }
    }
}

pub struct ScriptedSource {
    limit: Option<u64>,
    produced: u64,
    fail_at_limit: bool,
}

impl ScriptedSource {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            produced: 0,
            fail_at_limit: false,
        }
    }

    /// Report a read error instead of end of stream once the limit is hit.
    pub fn failing(mut self) -> Self {
        self.fail_at_limit = true;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            if self.fail_at_limit {
                return Err(anyhow!("connection reset by peer"));
            }
            return Ok(None);
        }
        self.produced += 1;
        let pixels = vec![128u8; 64 * 48 * 3];
        Ok(Frame::from_rgb(64, 48, pixels, self.produced))
    }
}

/// Returns `script[n]` on the n-th call, then nothing.
pub struct ScriptedClassifier {
    script: Vec<Vec<BoundingBox>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Vec<BoundingBox>>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl FaceClassifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn color_space(&self) -> ColorSpace {
        ColorSpace::Gray
    }

    fn classify(&mut self, _input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.get(call).cloned().unwrap_or_default())
    }
}

/// Records every delivery attempt; the first `fail_first` attempts fail.
#[derive(Clone, Default)]
pub struct RecordingSink {
    attempts: Arc<Mutex<Vec<DetectionEvent>>>,
    fail_first: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub fn failing_first(n: usize) -> Self {
        let sink = Self::default();
        sink.fail_first.store(n, Ordering::SeqCst);
        sink
    }

    pub fn attempts(&self) -> Vec<DetectionEvent> {
        self.attempts.lock().unwrap().clone()
    }
}

impl DetectionSink for RecordingSink {
    fn deliver(&self, event: &DetectionEvent) -> Result<()> {
        self.attempts.lock().unwrap().push(event.clone());
        let should_fail = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            Err(anyhow!("analysis service unavailable"))
        } else {
            Ok(())
        }
    }
}

pub fn context(
    opener: Arc<FakeOpener>,
    classifier: impl FaceClassifier + 'static,
    sink: RecordingSink,
    frame_interval: Duration,
) -> WorkerContext {
    WorkerContext {
        opener,
        engine: DetectionEngine::new(classifier),
        forwarder: Arc::new(ResultForwarder::new(sink)),
        stream_options: StreamOptions::default(),
        frame_interval,
    }
}

pub fn face() -> BoundingBox {
    BoundingBox::new(8, 8, 16, 16)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Send one raw HTTP request and split the response into status, headers and body.
pub fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<(u16, String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes())?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    let status = headers
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| anyhow!("missing status line in response"))?;
    Ok((status, headers, body))
}
