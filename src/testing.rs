//! Test doubles shared by unit tests.

use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::detect::{BoundingBox, ColorPalette, Detector, Prediction};
use crate::error::{LookoutError, Result};
use crate::frame::{Frame, ReadResult};
use crate::ingest::{FrameSource, SourceStats};

pub(crate) fn gray_frame(sequence: u64) -> Frame {
    Frame::new(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90])), sequence)
}

/// Source replaying a fixed script, then `Exhausted` forever.
pub(crate) struct ScriptedSource {
    script: VecDeque<ReadResult>,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<ReadResult>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<ReadResult> {
        Ok(self.script.pop_front().unwrap_or(ReadResult::Exhausted))
    }

    fn stop(&mut self) {}

    fn describe(&self) -> String {
        "scripted".into()
    }

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

/// Detector reporting the same labels for every frame, or failing on demand.
pub(crate) struct FixedDetector {
    labels: Vec<&'static str>,
    palette: ColorPalette,
    fail_after: Option<usize>,
    calls: usize,
    pub(crate) seen: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl FixedDetector {
    pub(crate) fn new(labels: Vec<&'static str>) -> Self {
        let palette = ColorPalette::for_labels(&labels);
        Self {
            labels,
            palette,
            fail_after: None,
            calls: 0,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every call after the first `calls` succeed.
    pub(crate) fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }
}

impl Detector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    fn detect(&mut self, frame: &Frame, _threshold: f32) -> Result<Vec<Prediction>> {
        self.calls += 1;
        if self.fail_after.is_some_and(|limit| self.calls > limit) {
            return Err(LookoutError::Detector("engine crashed".into()));
        }
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((frame.width(), frame.height()));
        }
        Ok(self
            .labels
            .iter()
            .map(|label| Prediction::new(*label, 0.9, BoundingBox::new(10, 10, 40, 40)))
            .collect())
    }
}
