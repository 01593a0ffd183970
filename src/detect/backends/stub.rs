use anyhow::Result;

use crate::detect::backend::{ClassifierInput, ColorSpace, FaceClassifier};
use crate::frame::BoundingBox;

/// Stub backend. Reports the same fixed boxes for every frame (none by
/// default), which keeps the pipeline runnable without a model.
#[derive(Clone, Debug, Default)]
pub struct StubClassifier {
    boxes: Vec<BoundingBox>,
    calls: u64,
}

impl StubClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes, calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl FaceClassifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn color_space(&self) -> ColorSpace {
        ColorSpace::Gray
    }

    fn classify(&mut self, _input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        self.calls += 1;
        Ok(self.boxes.clone())
    }
}
