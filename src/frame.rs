//! Decoded frames and the regions cropped out of them.
//!
//! - `Frame`: one decoded RGB picture from a stream, with its capture time.
//! - `RegionOfInterest`: a rectangular crop of one frame flagged by the detector.
//!
//! Both are ephemeral. A frame lives for one iteration of a worker loop and its
//! regions are consumed by the forwarder before the next frame is read.

use std::time::SystemTime;

use image::RgbImage;

/// One decoded frame in RGB24.
pub struct Frame {
    image: RgbImage,
    /// Wall-clock capture time, stamped by the source.
    pub captured_at: SystemTime,
    /// Position of this frame within its stream, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
            sequence,
        }
    }

    /// Build a frame from packed RGB bytes. Fails if the buffer length does not
    /// match `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, pixels).map(|image| Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clip this box to a `frame_width` x `frame_height` frame.
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(self, frame_width: u32, frame_height: u32) -> Option<Self> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            width,
            height,
            ..self
        })
    }
}

/// A crop of one frame containing a detected face.
#[derive(Debug)]
pub struct RegionOfInterest {
    pub image: RgbImage,
    pub bounds: BoundingBox,
    /// Capture time of the frame this region came from.
    pub captured_at: SystemTime,
}

impl RegionOfInterest {
    /// Crop `bounds` out of `frame`. Bounds must already be clamped.
    pub(crate) fn crop(frame: &Frame, bounds: BoundingBox) -> Self {
        let image = image::imageops::crop_imm(
            frame.image(),
            bounds.x,
            bounds.y,
            bounds.width,
            bounds.height,
        )
        .to_image();
        Self {
            image,
            bounds,
            captured_at: frame.captured_at,
        }
    }
}
