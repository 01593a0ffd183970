//! Frame ingestion.
//!
//! Decoding is an external capability. The core only sees two seams:
//! - `StreamOpener::open(url)` produces an exclusively owned `FrameSource`
//! - `FrameSource::next_frame()` yields frames until end of stream
//!
//! `RtspOpener` is the production opener. It supports:
//! - `stub://` synthetic streams (tests, demos)
//! - RTSP via FFmpeg (feature: rtsp-ffmpeg)
//! - RTSP via GStreamer (feature: rtsp-gstreamer)
//!
//! Sources MUST NOT:
//! - Store decoded frames to disk
//! - Be shared between workers

pub mod rtsp;
#[cfg(feature = "rtsp-ffmpeg")]
pub(crate) mod rtsp_ffmpeg;

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

pub use rtsp::RtspOpener;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport and timeout hints applied when opening a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Upper bound on the connect attempt.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a single frame. `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
        }
    }
}

/// An open handle to a live stream.
pub trait FrameSource: Send {
    /// Next decoded frame, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens frame sources. Shared by all workers.
pub trait StreamOpener: Send + Sync {
    fn open(&self, url: &str, options: &StreamOptions) -> Result<Box<dyn FrameSource>>;
}

/// Append the reliable-transport and connect-timeout hints to a stream URL.
pub fn stream_url(rtsp_url: &str, options: &StreamOptions) -> String {
    let separator = if rtsp_url.contains('?') { '&' } else { '?' };
    format!(
        "{rtsp_url}{separator}rtsp_transport=tcp&timeout={}",
        options.connect_timeout.as_millis()
    )
}
