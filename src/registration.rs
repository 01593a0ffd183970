//! Camera registrations.
//!
//! A `CameraRegistration` is the unit that flows from the intake endpoints into
//! the `IngestionQueue`. It is only constructed through validation, so every
//! instance in the queue has all three fields present and non-empty.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validated registration: one camera stream bound to one event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraRegistration {
    rtsp_url: String,
    device_id: String,
    event_id: String,
}

impl CameraRegistration {
    /// Build a registration, rejecting missing or blank fields.
    pub fn new(
        rtsp_url: impl Into<String>,
        device_id: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        RegistrationRequest {
            rtsp_url: Some(rtsp_url.into()),
            device_id: Some(device_id.into()),
            event_id: Some(event_id.into()),
        }
        .validate()
    }

    pub fn rtsp_url(&self) -> &str {
        &self.rtsp_url
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

/// Wire shape of a registration as received by the intake endpoints.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub rtsp_url: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl RegistrationRequest {
    /// Check that every field is present. Fields are checked in the order
    /// `rtsp_url`, `device_id`, `event_id`; the first missing one is reported.
    pub fn validate(self) -> Result<CameraRegistration, ValidationError> {
        let rtsp_url = required("rtsp_url", self.rtsp_url)?;
        let device_id = required("device_id", self.device_id)?;
        let event_id = required("event_id", self.event_id)?;
        Ok(CameraRegistration {
            rtsp_url,
            device_id,
            event_id,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ValidationError::MissingField(field)),
    }
}
