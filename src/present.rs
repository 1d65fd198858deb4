//! Presentation boundary.
//!
//! The detection loop and the alert pool report through `Presenter` and never
//! touch a rendering toolkit. Both callbacks are fire-and-forget and are called
//! from several threads (loop thread, alert workers), once per frame at most
//! for `on_frame`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::detect::Detection;
use crate::frame::Frame;

pub const STATUS_LOADING_MODEL: &str = "Loading model...";
pub const STATUS_MODEL_LOADED: &str = "Model loaded";
pub const STATUS_NO_SOURCE: &str = "No video source";
pub const STATUS_NO_DETECTIONS: &str = "No detections yet";

pub trait Presenter: Send + Sync {
    /// A processed frame and the detections that counted toward the streak.
    fn on_frame(&self, frame: &Frame, detections: &[Detection]);

    /// Replace the status line. An empty string clears it.
    fn on_status(&self, text: &str);
}

/// Box and caption to draw over a frame, in pixel coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    /// `"{label}: {percent}%"`, drawn just above the box.
    pub caption: String,
}

pub fn overlays(frame: &Frame, detections: &[Detection]) -> Vec<Overlay> {
    detections
        .iter()
        .map(|detection| {
            let (x0, y0, x1, y1) = detection.bbox.to_pixels(frame.width, frame.height);
            Overlay {
                x0,
                y0,
                x1,
                y1,
                caption: format!(
                    "{}: {}%",
                    detection.label,
                    (detection.confidence * 100.0) as u32
                ),
            }
        })
        .collect()
}

/// Presenter for headless runs: status goes to the log at info, frames at debug.
pub struct LogPresenter {
    frames: AtomicU64,
    log_every: u64,
}

impl LogPresenter {
    /// Log one frame summary every `log_every` frames (0 disables frame logs).
    pub fn new(log_every: u64) -> Self {
        Self {
            frames: AtomicU64::new(0),
            log_every,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Default for LogPresenter {
    fn default() -> Self {
        Self::new(100)
    }
}

impl Presenter for LogPresenter {
    fn on_frame(&self, frame: &Frame, detections: &[Detection]) {
        let seen = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if self.log_every == 0 || seen % self.log_every != 0 {
            return;
        }
        let captions: Vec<String> = overlays(frame, detections)
            .into_iter()
            .map(|overlay| overlay.caption)
            .collect();
        log::debug!(
            "frame {} ({}x{}, {} ms old): [{}]",
            frame.index,
            frame.width,
            frame.height,
            frame.age_ms(),
            captions.join(", ")
        );
    }

    fn on_status(&self, text: &str) {
        if text.is_empty() {
            log::debug!("status cleared");
        } else {
            log::info!("status: {}", text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn overlays_use_pixel_space_and_percent_captions() {
        let frame = Frame::new(vec![0u8; 100 * 50 * 3], 100, 50, 1).unwrap();
        let detections = vec![Detection::new(
            BoundingBox::new(0.1, 0.2, 0.5, 0.6),
            "crash",
            0.937,
        )];
        let overlays = overlays(&frame, &detections);
        assert_eq!(
            overlays,
            vec![Overlay {
                x0: 20,
                y0: 5,
                x1: 60,
                y1: 25,
                caption: "crash: 93%".to_string(),
            }]
        );
    }

    #[test]
    fn log_presenter_counts_frames() {
        let presenter = LogPresenter::new(2);
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1).unwrap();
        for _ in 0..5 {
            presenter.on_frame(&frame, &[]);
        }
        assert_eq!(presenter.frames_seen(), 5);
    }
}
