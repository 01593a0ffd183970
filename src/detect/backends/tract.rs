use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::{ClassifierInput, ColorSpace, FaceClassifier};
use crate::detect::nms::{suppress, ScoredBox, DEFAULT_IOU_THRESHOLD};
use crate::frame::BoundingBox;

/// Tract-based face detector for UltraFace-style ONNX models.
///
/// The model takes a `1x3xHxW` RGB tensor normalised to roughly [-1, 1] and
/// produces `scores` (`1xNx2`, background/face) and `boxes` (`1xNx4`,
/// normalised corner coordinates). The model is loaded from a local file.
pub struct TractFaceClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractFaceClassifier {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            confidence_threshold: 0.7,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &image::RgbImage) -> Tensor {
        let resized = image::imageops::resize(
            frame,
            self.input_width,
            self.input_height,
            FilterType::Triangle,
        );
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                let px = resized.get_pixel(x as u32, y as u32);
                (px.0[channel] as f32 - 127.0) / 128.0
            },
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: &TVec<TValue>) -> Result<Vec<ScoredBox>> {
        let scores = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no score output"))?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;
        let boxes = outputs
            .get(1)
            .ok_or_else(|| anyhow!("model produced no box output"))?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;

        let scores = scores
            .into_shape((scores.len() / 2, 2))
            .context("score tensor is not Nx2")?;
        let boxes = boxes
            .into_shape((boxes.len() / 4, 4))
            .context("box tensor is not Nx4")?;
        if scores.nrows() != boxes.nrows() {
            return Err(anyhow!(
                "model produced {} scores but {} boxes",
                scores.nrows(),
                boxes.nrows()
            ));
        }

        let candidates = scores
            .outer_iter()
            .zip(boxes.outer_iter())
            .filter(|(score, _)| score[1] >= self.confidence_threshold)
            .map(|(score, corners)| ScoredBox {
                corners: [corners[0], corners[1], corners[2], corners[3]],
                score: score[1],
            })
            .collect();
        Ok(suppress(candidates, self.iou_threshold))
    }
}

impl FaceClassifier for TractFaceClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn color_space(&self) -> ColorSpace {
        ColorSpace::Rgb
    }

    fn classify(&mut self, input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        let ClassifierInput::Rgb(frame) = input else {
            return Err(anyhow!("tract backend requires RGB input"));
        };
        let tensor = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let (width, height) = frame.dimensions();
        Ok(self
            .decode(&outputs)?
            .into_iter()
            .filter_map(|b| to_pixels(b.corners, width, height))
            .collect())
    }
}

/// Map normalised corners onto a `width` x `height` frame.
fn to_pixels(corners: [f32; 4], width: u32, height: u32) -> Option<BoundingBox> {
    let x1 = (corners[0].clamp(0.0, 1.0) * width as f32) as u32;
    let y1 = (corners[1].clamp(0.0, 1.0) * height as f32) as u32;
    let x2 = (corners[2].clamp(0.0, 1.0) * width as f32) as u32;
    let y2 = (corners[3].clamp(0.0, 1.0) * height as f32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(BoundingBox::new(x1, y1, x2 - x1, y2 - y1))
}
