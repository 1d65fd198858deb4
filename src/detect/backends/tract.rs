#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::labels::LabelMap;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Output tensor positions of an exported SSD-style detection graph.
#[derive(Clone, Copy, Debug)]
pub struct OutputLayout {
    /// `[1, N, 4]` boxes as `(ymin, xmin, ymax, xmax)`.
    pub boxes: usize,
    /// `[1, N]` class ids (float-encoded).
    pub classes: usize,
    /// `[1, N]` scores.
    pub scores: usize,
}

impl Default for OutputLayout {
    /// Order produced by the object-detection saved-model to ONNX export.
    fn default() -> Self {
        Self {
            boxes: 1,
            classes: 2,
            scores: 4,
        }
    }
}

/// Tract-based backend for ONNX object-detection models.
///
/// The model takes a `[1, H, W, 3]` uint8 RGB tensor. Frames are resampled to
/// the model input with nearest-neighbour sampling.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: LabelMap,
    layout: OutputLayout,
    width: u32,
    height: u32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, labels: LabelMap, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            layout: OutputLayout::default(),
            width,
            height,
        })
    }

    /// Override the default output tensor positions.
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let pixels = frame.pixels();
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);

        let input = tract_ndarray::Array4::from_shape_fn((1, dst_h, dst_w, 3), |(_, y, x, c)| {
            let sy = y * src_h / dst_h;
            let sx = x * src_w / dst_w;
            pixels[(sy * src_w + sx) * 3 + c]
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = |index: usize, what: &str| {
            outputs
                .get(index)
                .ok_or_else(|| anyhow!("model produced no {} output at index {}", what, index))
        };
        let boxes = output(self.layout.boxes, "boxes")?
            .to_array_view::<f32>()
            .context("box tensor was not f32")?;
        let classes = output(self.layout.classes, "classes")?
            .to_array_view::<f32>()
            .context("class tensor was not f32")?;
        let scores = output(self.layout.scores, "scores")?
            .to_array_view::<f32>()
            .context("score tensor was not f32")?;

        let boxes: Vec<f32> = boxes.iter().copied().collect();
        let classes: Vec<f32> = classes.iter().copied().collect();
        let scores: Vec<f32> = scores.iter().copied().collect();
        if boxes.len() != scores.len() * 4 || classes.len() != scores.len() {
            return Err(anyhow!(
                "inconsistent output sizes: {} boxes, {} classes, {} scores",
                boxes.len() / 4,
                classes.len(),
                scores.len()
            ));
        }

        Ok(scores
            .iter()
            .zip(classes.iter())
            .zip(boxes.chunks_exact(4))
            .map(|((&score, &class), corners)| {
                Detection::new(
                    BoundingBox::new(corners[0], corners[1], corners[2], corners[3]),
                    self.labels.name(class as i64),
                    score,
                )
            })
            .collect())
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; crate::frame::rgb_len(self.width, self.height)?],
            self.width,
            self.height,
            0,
        )?;
        self.infer(&blank).map(|_| ())
    }
}
