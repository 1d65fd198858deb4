use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

enum Step {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Scripted backend for tests and demos.
///
/// Replays a queue of per-frame outcomes, one per `infer` call. Once the
/// script runs out, the fallback (if any) is returned for every frame.
#[derive(Default)]
pub struct ScriptedDetector {
    steps: VecDeque<Step>,
    fallback: Option<Vec<Detection>>,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame yields one full-frame detection with this label and confidence.
    pub fn constant(label: &str, confidence: f32) -> Self {
        Self {
            fallback: Some(vec![Detection::new(BoundingBox::full(), label, confidence)]),
            ..Self::default()
        }
    }

    /// One full-frame detection per frame, with confidences taken in order.
    pub fn from_confidences(label: &str, confidences: impl IntoIterator<Item = f32>) -> Self {
        let mut detector = Self::new();
        for confidence in confidences {
            detector = detector.then(vec![Detection::new(
                BoundingBox::full(),
                label,
                confidence,
            )]);
        }
        detector
    }

    /// Queue the detections for the next frame.
    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.steps.push_back(Step::Detections(detections));
        self
    }

    /// Queue an inference failure for the next frame.
    pub fn then_fail(mut self, reason: &str) -> Self {
        self.steps.push_back(Step::Fail(reason.to_string()));
        self
    }

    /// Detections returned after the script is exhausted.
    pub fn otherwise(mut self, detections: Vec<Detection>) -> Self {
        self.fallback = Some(detections);
        self
    }

    /// Number of frames seen so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.steps.pop_front() {
            Some(Step::Detections(detections)) => Ok(detections),
            Some(Step::Fail(reason)) => Err(anyhow!(reason)),
            None => Ok(self.fallback.clone().unwrap_or_default()),
        }
    }
}
