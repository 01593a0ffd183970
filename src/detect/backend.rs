use anyhow::Result;
use image::{GrayImage, RgbImage};

use crate::frame::BoundingBox;

/// Color space a classifier expects its input in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

/// Frame pixels converted to the classifier's color space.
#[derive(Clone, Copy, Debug)]
pub enum ClassifierInput<'a> {
    Gray(&'a GrayImage),
    Rgb(&'a RgbImage),
}

/// Face classifier backend trait.
///
/// This is the external detection capability. Implementations receive the
/// whole frame in the color space they declare and return face boxes in that
/// frame's pixel coordinates. Boxes may overhang the frame; the engine clamps.
///
/// Backends may keep internal state between calls, so `classify` takes
/// `&mut self`. The engine serialises access.
pub trait FaceClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Color space `classify` expects.
    fn color_space(&self) -> ColorSpace;

    /// Find faces. An empty vector means no faces, not failure.
    fn classify(&mut self, input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<C: FaceClassifier + ?Sized> FaceClassifier for Box<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn color_space(&self) -> ColorSpace {
        (**self).color_space()
    }

    fn classify(&mut self, input: ClassifierInput<'_>) -> Result<Vec<BoundingBox>> {
        (**self).classify(input)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
