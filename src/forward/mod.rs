//! Result forwarding to the downstream analysis service.
//!
//! Each detected region becomes one `DetectionEvent`: the region encoded as an
//! in-memory JPEG plus the camera id, event id and send time. Regions are
//! uploaded independently; a failed upload is logged and dropped, and never
//! stops the remaining regions or the worker.

mod http;
mod multipart;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use image::codecs::jpeg::JpegEncoder;

use crate::frame::RegionOfInterest;

pub use http::HttpSink;
pub use multipart::MultipartBody;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// One detection as sent to the analysis service.
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub camera_id: String,
    pub event_id: String,
    pub detection_time: DateTime<Utc>,
    pub image_jpeg: Vec<u8>,
}

impl DetectionEvent {
    /// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.123Z`.
    pub fn detection_time_iso(&self) -> String {
        self.detection_time
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Destination for detection events.
pub trait DetectionSink: Send + Sync {
    fn deliver(&self, event: &DetectionEvent) -> Result<()>;
}

/// Outcome of forwarding one frame's regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardReport {
    pub attempted: usize,
    pub delivered: usize,
}

impl ForwardReport {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

pub struct ResultForwarder {
    sink: Box<dyn DetectionSink>,
    jpeg_quality: u8,
}

impl ResultForwarder {
    pub fn new<S: DetectionSink + 'static>(sink: S) -> Self {
        Self {
            sink: Box::new(sink),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Encode `region`, stamp the current time, and deliver it.
    pub fn upload(&self, region: &RegionOfInterest, device_id: &str, event_id: &str) -> Result<()> {
        let image_jpeg = encode_jpeg(region, self.jpeg_quality)?;
        let event = DetectionEvent {
            camera_id: device_id.to_string(),
            event_id: event_id.to_string(),
            detection_time: Utc::now(),
            image_jpeg,
        };
        self.sink.deliver(&event)
    }

    /// Upload every region, one attempt each. Failures are logged, not returned.
    pub fn forward_all(
        &self,
        regions: &[RegionOfInterest],
        device_id: &str,
        event_id: &str,
    ) -> ForwardReport {
        let mut report = ForwardReport::default();
        for (index, region) in regions.iter().enumerate() {
            report.attempted += 1;
            match self.upload(region, device_id, event_id) {
                Ok(()) => report.delivered += 1,
                Err(err) => log::warn!(
                    "upload failed for camera {} region {}/{}: {:#}",
                    device_id,
                    index + 1,
                    regions.len(),
                    err
                ),
            }
        }
        report
    }
}

fn encode_jpeg(region: &RegionOfInterest, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&region.image)
        .context("encode region as JPEG")?;
    Ok(buf)
}
