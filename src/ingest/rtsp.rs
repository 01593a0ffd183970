//! RTSP stream opener.
//!
//! `RtspOpener` picks a decoding backend per URL:
//! - `stub://` URLs get a synthetic source (no decoder needed)
//! - everything else goes to FFmpeg or GStreamer, whichever feature is enabled
//!
//! Every backend forces TCP transport and bounds the connect attempt by
//! `StreamOptions::connect_timeout`. Reads are bounded by
//! `StreamOptions::read_timeout` when one is set.

use anyhow::{Context, Result};
use url::Url;

use super::{FrameSource, StreamOpener, StreamOptions};
use crate::frame::Frame;

#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;
#[cfg(feature = "rtsp-gstreamer")]
use std::time::Duration;

/// Production opener. Stateless; one instance is shared by every worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct RtspOpener;

impl RtspOpener {
    pub fn new() -> Self {
        Self
    }
}

impl StreamOpener for RtspOpener {
    fn open(&self, url: &str, options: &StreamOptions) -> Result<Box<dyn FrameSource>> {
        if url.starts_with("stub://") {
            return Ok(Box::new(SyntheticSource::from_url(url)?));
        }
        #[cfg(feature = "rtsp-ffmpeg")]
        {
            let source = super::rtsp_ffmpeg::FfmpegRtspSource::open(url, options)?;
            Ok(Box::new(source))
        }
        #[cfg(all(feature = "rtsp-gstreamer", not(feature = "rtsp-ffmpeg")))]
        {
            let source = GstreamerRtspSource::open(url, options)?;
            Ok(Box::new(source))
        }
        #[cfg(not(any(feature = "rtsp-ffmpeg", feature = "rtsp-gstreamer")))]
        {
            let _ = options;
            anyhow::bail!("opening {url} requires the rtsp-ffmpeg or rtsp-gstreamer feature")
        }
    }
}

/// Remove the `rtsp_transport` and `timeout` query hints so backends that take
/// them as properties do not forward them to the camera.
pub fn strip_transport_hints(url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("parse stream url {url}"))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "rtsp_transport" && k != "timeout")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    Ok(parsed.to_string())
}

/// FFmpeg demuxer options for a stream: TCP transport, the connect bound as
/// `timeout` and, when set, the per-read bound as `rw_timeout`. Both are in
/// microseconds.
#[cfg_attr(not(feature = "rtsp-ffmpeg"), allow(dead_code))]
pub(crate) fn ffmpeg_options(options: &StreamOptions) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        ("rtsp_transport", "tcp".to_string()),
        ("timeout", options.connect_timeout.as_micros().to_string()),
    ];
    if let Some(read_timeout) = options.read_timeout {
        pairs.push(("rw_timeout", read_timeout.as_micros().to_string()));
    }
    pairs
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

const SYNTHETIC_WIDTH: u32 = 320;
const SYNTHETIC_HEIGHT: u32 = 240;

/// Generates gradient frames. `stub://name?frames=N` ends the stream after N
/// frames; without `frames` the stream never ends.
pub struct SyntheticSource {
    name: String,
    frame_limit: Option<u64>,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse stub url {url}"))?;
        let mut source = Self {
            name: parsed.host_str().unwrap_or("stub").to_string(),
            frame_limit: None,
            width: SYNTHETIC_WIDTH,
            height: SYNTHETIC_HEIGHT,
            frame_count: 0,
        };
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    source.frame_limit =
                        Some(value.parse().context("stub frames must be an integer")?)
                }
                "width" => source.width = value.parse().context("stub width must be an integer")?,
                "height" => {
                    source.height = value.parse().context("stub height must be an integer")?
                }
                _ => {}
            }
        }
        if source.width == 0 || source.height == 0 {
            anyhow::bail!("stub frame dimensions must be non-zero");
        }
        log::info!("RtspOpener: opened {} (synthetic)", source.name);
        Ok(source)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.frame_count += 1;
        let frame = Frame::from_rgb(
            self.width,
            self.height,
            self.generate_pixels(),
            self.frame_count,
        )
        .context("synthetic frame buffer size mismatch")?;
        Ok(Some(frame))
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
pub(crate) struct GstreamerRtspSource {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    read_timeout: Option<Duration>,
    frame_count: u64,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` and wait for it to
    /// reach Playing within the connect timeout.
    pub(crate) fn open(url: &str, options: &StreamOptions) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let location = strip_transport_hints(url)?;
        let connect_us = options.connect_timeout.as_micros();
        let pipeline_description = format!(
            "rtspsrc location={location} protocols=tcp latency=0 timeout={connect_us} \
             tcp-timeout={connect_us} ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true"
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start RTSP pipeline for {location}"))?;
        let connect_ms = options.connect_timeout.as_millis() as u64;
        let (result, state, _) = pipeline.state(gstreamer::ClockTime::from_mseconds(connect_ms));
        if result.is_err() || state != gstreamer::State::Playing {
            let _ = pipeline.set_state(gstreamer::State::Null);
            anyhow::bail!("RTSP stream {location} did not start within {connect_ms} ms");
        }
        log::info!("RtspOpener: connected to {location} (gstreamer)");

        Ok(Self {
            url: location,
            pipeline,
            appsink,
            read_timeout: options.read_timeout,
            frame_count: 0,
        })
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl FrameSource for GstreamerRtspSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let sample = match self.read_timeout {
            Some(timeout) => self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64)),
            None => self.appsink.try_pull_sample(gstreamer::ClockTime::NONE),
        };
        let Some(sample) = sample else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            anyhow::bail!("RTSP stream {} stalled", self.url);
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        let frame = Frame::from_rgb(width, height, pixels, self.frame_count)
            .context("RTSP sample size does not match caps")?;
        Ok(Some(frame))
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
