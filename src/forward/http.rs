use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::multipart::MultipartBody;
use super::{DetectionEvent, DetectionSink};

/// Uploads detection events as `multipart/form-data` POSTs to a fixed URL.
///
/// Fields: `cameraId`, `detectionTime`, `eventId`, and an `image` file part
/// holding the JPEG. Any 2xx response is success; the body is ignored.
pub struct HttpSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl DetectionSink for HttpSink {
    fn deliver(&self, event: &DetectionEvent) -> Result<()> {
        let body = MultipartBody::new()
            .text("cameraId", &event.camera_id)
            .text("detectionTime", &event.detection_time_iso())
            .text("eventId", &event.event_id)
            .file("image", "detection.jpg", "image/jpeg", &event.image_jpeg);
        let content_type = body.content_type();
        let bytes = body.finish();

        match self
            .agent
            .post(&self.url)
            .set("Content-Type", &content_type)
            .send_bytes(&bytes)
        {
            Ok(response) => {
                log::debug!(
                    "uploaded detection for camera {} ({} bytes, HTTP {})",
                    event.camera_id,
                    event.image_jpeg.len(),
                    response.status()
                );
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("analysis service returned HTTP {code}"))
            }
            Err(err) => Err(err).with_context(|| format!("POST {}", self.url)),
        }
    }
}
