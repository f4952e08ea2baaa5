use crate::detect::backend::Detector;
use crate::detect::palette::ColorPalette;
use crate::detect::prediction::{BoundingBox, Prediction};
use crate::error::Result;
use crate::frame::Frame;

const LABEL: &str = "motion";
const DIFF_THRESHOLD: u8 = 25;
const MIN_CHANGED: u64 = 16;

/// Frame-difference detector registered as `motion`.
///
/// Compares each frame's luma with the previous one and reports the changed
/// region as a single "motion" prediction. The first frame, and any frame
/// whose size differs from its predecessor, only primes the reference.
pub struct MotionBackend {
    previous: Option<LumaFrame>,
    palette: ColorPalette,
}

struct LumaFrame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self {
            previous: None,
            palette: ColorPalette::for_labels(&[LABEL]),
        }
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Prediction>> {
        let current = to_luma(frame);
        let region = match &self.previous {
            Some(previous)
                if previous.width == current.width && previous.height == current.height =>
            {
                changed_region(previous, &current)
            }
            _ => None,
        };
        self.previous = Some(current);

        let Some((changed, bbox)) = region else {
            return Ok(Vec::new());
        };
        let confidence = (changed as f64 / bbox.area() as f64) as f32;
        if confidence < threshold {
            return Ok(Vec::new());
        }
        Ok(vec![Prediction::new(LABEL, confidence, bbox)])
    }
}

/// Count of changed pixels and the box around them, if enough changed.
fn changed_region(previous: &LumaFrame, current: &LumaFrame) -> Option<(u64, BoundingBox)> {
    let width = current.width;
    let mut changed = 0u64;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (i, (now, before)) in current.luma.iter().zip(previous.luma.iter()).enumerate() {
        if now.abs_diff(*before) > DIFF_THRESHOLD {
            let x = (i as u32) % width;
            let y = (i as u32) / width;
            changed += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    (changed >= MIN_CHANGED)
        .then(|| (changed, BoundingBox::new(min_x, min_y, max_x + 1, max_y + 1)))
}

fn to_luma(frame: &Frame) -> LumaFrame {
    let luma = frame
        .image()
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            ((u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000) as u8
        })
        .collect();
    LumaFrame {
        width: frame.width(),
        height: frame.height(),
        luma,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn flat(shade: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(32, 32, Rgb([shade, shade, shade])), 1)
    }

    #[test]
    fn motion_backend_detects_change() -> Result<()> {
        let mut backend = MotionBackend::new();

        assert!(backend.detect(&flat(10), 0.5)?.is_empty());

        let mut image = RgbImage::from_pixel(32, 32, Rgb([10, 10, 10]));
        for y in 4..12 {
            for x in 8..16 {
                image.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        let moved = backend.detect(&Frame::new(image, 2), 0.5)?;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].label, "motion");
        assert_eq!(moved[0].bbox, BoundingBox::new(8, 4, 16, 12));

        Ok(())
    }

    #[test]
    fn static_scene_is_quiet() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&flat(100), 0.5)?;
        assert!(backend.detect(&flat(100), 0.5)?.is_empty());
        Ok(())
    }

    #[test]
    fn size_change_resets_reference() -> Result<()> {
        let mut backend = MotionBackend::new();
        backend.detect(&flat(0), 0.0)?;
        let bigger = Frame::new(RgbImage::from_pixel(64, 64, Rgb([255, 255, 255])), 2);
        assert!(backend.detect(&bigger, 0.0)?.is_empty());
        Ok(())
    }
}
