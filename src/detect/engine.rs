use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::backend::{ClassifierInput, ColorSpace, FaceClassifier};
use crate::frame::{Frame, RegionOfInterest};

/// Turns frames into face crops using a shared classifier.
///
/// The classifier is wrapped in a `Mutex` because `FaceClassifier::classify`
/// takes `&mut self`. Cloning the engine shares the same classifier.
///
/// A panicking classifier fails only the frame it was given: the panic is
/// caught while the lock is held, so the lock is never poisoned for other
/// frames or other workers.
#[derive(Clone)]
pub struct DetectionEngine {
    classifier: Arc<Mutex<dyn FaceClassifier>>,
    name: &'static str,
}

impl DetectionEngine {
    pub fn new<C: FaceClassifier + 'static>(classifier: C) -> Self {
        let name = classifier.name();
        Self {
            classifier: Arc::new(Mutex::new(classifier)),
            name,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.name
    }

    /// Detect faces in `frame` and crop each one out.
    ///
    /// Boxes are clamped to the frame and empty boxes dropped. Output order is
    /// the classifier's. No faces is `Ok(vec![])`.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<RegionOfInterest>> {
        let mut classifier = self
            .classifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match classifier.color_space() {
            ColorSpace::Gray => {
                let gray = image::imageops::grayscale(frame.image());
                classifier.classify(ClassifierInput::Gray(&gray))
            }
            ColorSpace::Rgb => classifier.classify(ClassifierInput::Rgb(frame.image())),
        }));
        drop(classifier);
        let boxes = match outcome {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("{} classifier panicked", self.name)),
        };

        Ok(boxes
            .into_iter()
            .filter_map(|b| b.clamp_to(frame.width(), frame.height()))
            .map(|b| RegionOfInterest::crop(frame, b))
            .collect())
    }
}
