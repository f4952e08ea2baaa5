//! Frame types shared by sources, detectors and the annotator.
//!
//! - `Frame`: one decoded RGB image plus its capture sequence number.
//! - `ReadResult`: the three outcomes of a source read.
//!
//! Frames are transient. They are produced by a source, consumed by one
//! pipeline iteration and dropped.

use image::{imageops, imageops::FilterType, RgbImage};

use crate::error::{LookoutError, Result};

/// Width every published frame is resized to unless configured otherwise.
pub const DEFAULT_TARGET_WIDTH: u32 = 800;

/// Height every published frame is resized to unless configured otherwise.
pub const DEFAULT_TARGET_HEIGHT: u32 = 300;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded RGB8 frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Capture sequence number assigned by the source (1-based).
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| LookoutError::SourceRead("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(LookoutError::SourceRead(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| LookoutError::SourceRead("RGB buffer rejected".into()))?;
        Ok(Self::new(image, sequence))
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

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Resize in place. A frame already at the target size is left untouched.
    pub fn resize_to(&mut self, width: u32, height: u32) {
        if self.image.width() == width && self.image.height() == height {
            return;
        }
        self.image = imageops::resize(&self.image, width, height, FilterType::Triangle);
    }
}

// ----------------------------------------------------------------------------
// ReadResult
// ----------------------------------------------------------------------------

/// Outcome of a single `FrameSource::read`.
#[derive(Debug)]
pub enum ReadResult {
    /// A frame is available.
    Frame(Frame),
    /// Nothing new right now. Transient; try again on the next cycle.
    Empty,
    /// The source has no more frames and never will.
    Exhausted,
}

impl ReadResult {
    pub fn into_frame(self) -> Option<Frame> {
        match self {
            ReadResult::Frame(frame) => Some(frame),
            ReadResult::Empty | ReadResult::Exhausted => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ReadResult::Exhausted)
    }
}
