use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the frame given to the detector.
///
/// `end_x`/`end_y` are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
}

impl BoundingBox {
    pub fn new(start_x: u32, start_y: u32, end_x: u32, end_y: u32) -> Self {
        Self {
            start_x: start_x.min(end_x),
            start_y: start_y.min(end_y),
            end_x: end_x.max(start_x),
            end_y: end_y.max(start_y),
        }
    }

    pub fn width(&self) -> u32 {
        self.end_x - self.start_x
    }

    pub fn height(&self) -> u32 {
        self.end_y - self.start_y
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Map the box from a `from` sized frame onto a `to` sized frame.
    pub fn scale(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let sx = f64::from(to.0) / f64::from(from.0.max(1));
        let sy = f64::from(to.1) / f64::from(from.1.max(1));
        let map = |v: u32, s: f64, limit: u32| ((f64::from(v) * s).round() as u32).min(limit);
        Self::new(
            map(self.start_x, sx, to.0),
            map(self.start_y, sy, to.1),
            map(self.end_x, sx, to.0),
            map(self.end_y, sy, to.1),
        )
    }

    /// Clamp to a `width` x `height` frame.
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        Self::new(
            self.start_x.min(width),
            self.start_y.min(height),
            self.end_x.min(width),
            self.end_y.min(height),
        )
    }
}

/// A single detected object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}
