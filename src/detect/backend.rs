use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{LookoutError, Result};
use crate::frame::Frame;

use super::palette::ColorPalette;
use super::prediction::Prediction;

/// Default confidence threshold for `detect`.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Object detection engine.
///
/// Implementations receive a read-only frame and return labeled boxes in that
/// frame's pixel coordinates, in detection order. Failures are reported as
/// `LookoutError::Detector` and end the stream that triggered them.
pub trait Detector: Send {
    /// Engine identifier used by the registry.
    fn name(&self) -> &'static str;

    /// Label -> colour mapping used when drawing this detector's predictions.
    fn palette(&self) -> &ColorPalette;

    /// Run detection, keeping predictions with `confidence >= threshold`.
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Prediction>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Settings passed to a detector factory.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectorSettings {
    /// Model file for engines that load one.
    pub model_path: Option<PathBuf>,
    /// Newline-separated class names, indexed by class id.
    pub labels_path: Option<PathBuf>,
    /// Model input size, for engines with a fixed input.
    pub input_width: u32,
    pub input_height: u32,
}

/// Detector shared between stream connections.
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

pub fn share(detector: Box<dyn Detector>) -> SharedDetector {
    Arc::new(Mutex::new(detector))
}

pub(crate) fn lock_detector(detector: &SharedDetector) -> Result<MutexGuard<'_, Box<dyn Detector>>> {
    detector.lock().map_err(|_| LookoutError::Poisoned("detector"))
}
