use image::Rgb;

use crate::detect::backend::Detector;
use crate::detect::palette::ColorPalette;
use crate::detect::prediction::{BoundingBox, Prediction};
use crate::error::Result;
use crate::frame::Frame;
use crate::ingest::synthetic::{MARKER_PRIMARY, MARKER_SECONDARY};

const DEFAULT_TOLERANCE: u8 = 40;
const MIN_PIXELS: u64 = 16;

/// Colour-key detector registered as `stub`.
///
/// Each key colour stands for a label. All pixels within `tolerance` of a key
/// form one prediction whose box spans them and whose confidence is the share
/// of the box they fill. Paired with the synthetic sources it gives
/// deterministic detections without a model.
pub struct ColorKeyBackend {
    keys: Vec<(String, Rgb<u8>)>,
    tolerance: u8,
    palette: ColorPalette,
}

impl ColorKeyBackend {
    /// Keys matching the synthetic scene: red is "person", blue is "dog".
    pub fn new() -> Self {
        Self::with_keys(vec![
            ("person".to_string(), MARKER_PRIMARY),
            ("dog".to_string(), MARKER_SECONDARY),
        ])
    }

    pub fn with_keys(keys: Vec<(String, Rgb<u8>)>) -> Self {
        let labels: Vec<&str> = keys.iter().map(|(label, _)| label.as_str()).collect();
        let palette = ColorPalette::for_labels(&labels);
        Self {
            keys,
            tolerance: DEFAULT_TOLERANCE,
            palette,
        }
    }

    fn matches(&self, pixel: &Rgb<u8>, key: &Rgb<u8>) -> bool {
        pixel
            .0
            .iter()
            .zip(key.0.iter())
            .all(|(p, k)| p.abs_diff(*k) <= self.tolerance)
    }
}

impl Default for ColorKeyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for ColorKeyBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::new();
        for (label, key) in &self.keys {
            let mut count = 0u64;
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
            for (x, y, pixel) in frame.image().enumerate_pixels() {
                if self.matches(pixel, key) {
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
            if count < MIN_PIXELS {
                continue;
            }
            let bbox = BoundingBox::new(min_x, min_y, max_x + 1, max_y + 1);
            let confidence = (count as f64 / bbox.area() as f64) as f32;
            if confidence >= threshold {
                predictions.push(Prediction::new(label.clone(), confidence, bbox));
            }
        }
        Ok(predictions)
    }
}
