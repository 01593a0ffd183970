mod backend;
mod backends;
mod engine;
pub mod nms;

pub use backend::{ClassifierInput, ColorSpace, FaceClassifier};
pub use backends::StubClassifier;
#[cfg(feature = "backend-tract")]
pub use backends::TractFaceClassifier;
pub use engine::DetectionEngine;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

/// Build the configured classifier and warm it up.
pub fn build_classifier(settings: &DetectorSettings) -> Result<Box<dyn FaceClassifier>> {
    let mut classifier: Box<dyn FaceClassifier> = match settings.backend.as_str() {
        "stub" => Box::new(StubClassifier::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract detector requires a model path"))?;
            Box::new(
                TractFaceClassifier::new(model_path, settings.input_width, settings.input_height)?
                    .with_threshold(settings.confidence_threshold),
            )
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => return Err(anyhow!("tract detector requires the backend-tract feature")),
        other => return Err(anyhow!("unknown detector backend '{}'", other)),
    };
    classifier.warm_up()?;
    Ok(classifier)
}
