#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{Detector, DetectorSettings};
use crate::detect::palette::ColorPalette;
use crate::detect::prediction::{BoundingBox, Prediction};
use crate::error::{LookoutError, Result};
use crate::frame::Frame;

const DEFAULT_INPUT_SIDE: u32 = 300;

/// Tract-based backend for ONNX SSD-style detectors.
///
/// The model takes a `[1, 3, H, W]` f32 tensor in `0..1` and produces a
/// single `[1, N, 6]` (or `[N, 6]`) output whose rows are
/// `x1, y1, x2, y2, score, class_id` with coordinates normalized to `0..1`.
/// Class ids index into the labels file.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
    palette: ColorPalette,
}

impl TractBackend {
    /// Load the model and labels named in `settings`.
    pub fn load(settings: &DetectorSettings) -> Result<Self> {
        let model_path = settings
            .model_path
            .as_deref()
            .ok_or_else(|| LookoutError::Config("tract detector needs a model path".into()))?;
        let width = non_zero_or(settings.input_width, DEFAULT_INPUT_SIDE);
        let height = non_zero_or(settings.input_height, DEFAULT_INPUT_SIDE);
        let labels = match settings.labels_path.as_deref() {
            Some(path) => read_labels(path)?,
            None => Vec::new(),
        };
        Self::new(model_path, width, height, labels)
    }

    pub fn new(model_path: &Path, width: u32, height: u32, labels: Vec<String>) -> Result<Self> {
        let load_err = |e: anyhow::Error| {
            LookoutError::Detector(format!(
                "failed to load ONNX model from {}: {}",
                model_path.display(),
                e
            ))
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(load_err)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        let palette = ColorPalette::for_labels(&labels);
        Ok(Self {
            model,
            width,
            height,
            labels,
            palette,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Prediction>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| LookoutError::Detector(format!("ONNX inference failed: {e}")))?;
        let output = outputs
            .first()
            .ok_or_else(|| LookoutError::Detector("model produced no outputs".into()))?;
        let rows = output
            .to_array_view::<f32>()
            .map_err(|e| LookoutError::Detector(format!("model output was not f32: {e}")))?;
        let values: Vec<f32> = rows.iter().copied().collect();
        if values.len() % 6 != 0 {
            return Err(LookoutError::Detector(format!(
                "model output has {} values, expected rows of 6",
                values.len()
            )));
        }

        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let to_px = |v: f32, limit: f32| (v.clamp(0.0, 1.0) * limit).round() as u32;
        let predictions = values
            .chunks_exact(6)
            .filter(|row| row[4] >= threshold)
            .map(|row| {
                let bbox = BoundingBox::new(
                    to_px(row[0], fw),
                    to_px(row[1], fh),
                    to_px(row[2], fw),
                    to_px(row[3], fh),
                );
                Prediction::new(self.label_for(row[5].max(0.0) as usize), row[4], bbox)
            })
            .collect();
        Ok(predictions)
    }
}

fn non_zero_or(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        LookoutError::Config(format!("failed to read labels {}: {}", path.display(), e))
    })?;
    Ok(raw
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}
