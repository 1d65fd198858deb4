//! RHINO crash watch
//!
//! This crate watches a video source for vehicle crashes and raises email/SMS alerts.
//!
//! # Architecture
//!
//! Frames flow one way through the system:
//!
//! 1. **Ingest**: a `FrameSource` yields decoded RGB frames (file, camera, or synthetic).
//! 2. **Detect**: an injected `Detector` returns labelled boxes with confidences.
//! 3. **Trigger**: a `StreakCounter` debounces qualifying detections into alerts.
//! 4. **Alert**: a bounded `AlertPool` runs email and SMS dispatch off the frame loop.
//! 5. **Present**: a `Presenter` receives every frame and every status change.
//!
//! # Module Structure
//!
//! - `frame`: decoded frames
//! - `ingest`: frame sources (synthetic, local files, V4L2 cameras)
//! - `detect`: detector backends, detections, label maps
//! - `trigger`: streak counter and per-frame candidate scan
//! - `session`: detection loop and its start/stop control surface
//! - `alert`: alert events, delivery channels, dispatcher, bounded pool
//! - `present`: presentation callbacks and overlays
//! - `config`: file + environment configuration

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::OnceLock;

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod present;
pub mod session;
pub mod trigger;

pub use alert::{
    AlertChannel, AlertDispatcher, AlertEvent, AlertPool, AlertPoolConfig, AlertPoolStats,
    DispatchReport, EmailChannel, LogChannel, SmsChannel,
};
pub use detect::{BoundingBox, Detection, Detector, LabelMap, ScriptedDetector};
pub use error::RhinoError;
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, IngestSettings, SourceStats, SyntheticSource};
pub use present::{overlays, LogPresenter, Overlay, Presenter};
pub use session::{
    run_detection_loop, DetectionSession, LoopContext, LoopExit, LoopSummary, SessionState,
};
pub use trigger::{FrameScan, StreakCounter, TriggerPolicy};

/// Frames whose top detections exceed this confidence count toward a streak.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.92;

/// Number of qualifying detections that completes a streak and fires an alert.
pub const DEFAULT_STREAK_THRESHOLD: u32 = 20;

/// Candidates considered per frame, highest confidence first.
pub const DEFAULT_TOP_K: usize = 1;

// -------------------- Source Identifiers --------------------

/// Where frames come from: a file path (or `stub://` URL) or a camera device index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SourceId {
    File(String),
    Camera(u32),
}

impl SourceId {
    /// Parse a user-supplied source string.
    ///
    /// `camera:N` selects camera index N; anything else is treated as a path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if let Some(index) = raw.strip_prefix("camera:") {
            let index: u32 = index
                .parse()
                .map_err(|_| anyhow!("camera source must be camera:<index>, got '{}'", raw))?;
            return Ok(SourceId::Camera(index));
        }
        Ok(SourceId::File(raw.to_string()))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::File(path) => write!(f, "{}", path),
            SourceId::Camera(index) => write!(f, "camera:{}", index),
        }
    }
}

// -------------------- Phone Number Discipline --------------------

/// SMS recipients and senders MUST be E.164 numbers ("+15551234567").
pub fn validate_phone_number(number: &str) -> Result<()> {
    static E164_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = E164_RE.get_or_init(|| regex::Regex::new(r"^\+[1-9][0-9]{6,14}$").unwrap());

    if !re.is_match(number) {
        return Err(anyhow!(
            "phone number '{}' must be E.164 (^\\+[1-9][0-9]{{6,14}}$)",
            number
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camera_and_file_sources() {
        assert_eq!(SourceId::parse("camera:0").unwrap(), SourceId::Camera(0));
        assert_eq!(
            SourceId::parse(" clips/crash.mp4 ").unwrap(),
            SourceId::File("clips/crash.mp4".to_string())
        );
        assert!(SourceId::parse("camera:front").is_err());
        assert!(SourceId::parse("   ").is_err());
    }

    #[test]
    fn source_id_display_round_trips_camera() {
        let id = SourceId::Camera(2);
        assert_eq!(SourceId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn phone_numbers_must_be_e164() {
        assert!(validate_phone_number("+15551234567").is_ok());
        assert!(validate_phone_number("5551234567").is_err());
        assert!(validate_phone_number("+0123456789").is_err());
        assert!(validate_phone_number("+1 555 123 4567").is_err());
    }
}
