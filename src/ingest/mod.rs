//! Frame ingestion sources.
//!
//! This module provides the sources the detection loop can read from:
//! - Synthetic `stub://` streams (tests, demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - V4L2 cameras by device index (feature: ingest-v4l2)
//!
//! Every source yields RGB24 `Frame`s and reports end-of-stream as
//! `Ok(None)`. A read error means the source is gone: the loop ends with
//! `LoopExit::SourceUnavailable` and shows the "No video source" status.

#[cfg(feature = "ingest-v4l2")]
pub mod camera;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod file;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::SourceId;

#[cfg(feature = "ingest-v4l2")]
pub use camera::CameraSource;
#[cfg(feature = "ingest-file-ffmpeg")]
pub use file::FileSource;
pub use synthetic::SyntheticSource;

/// A stream of decoded frames.
pub trait FrameSource {
    /// Open the underlying device or file. Called once before the first read.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame. `Ok(None)` marks end-of-stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying device or file. Reads after close return `Ok(None)`.
    fn close(&mut self);

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool;

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Capture preferences shared by all sources.
#[derive(Clone, Debug)]
pub struct IngestSettings {
    /// Target frame rate (frames per second). Cameras are asked for this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Build and connect the source named by `id`.
pub fn open_source(id: &SourceId, settings: &IngestSettings) -> Result<Box<dyn FrameSource>> {
    let mut source = build_source(id, settings)?;
    source.connect()?;
    Ok(source)
}

fn build_source(id: &SourceId, settings: &IngestSettings) -> Result<Box<dyn FrameSource>> {
    match id {
        SourceId::File(path) if path.starts_with("stub://") => {
            Ok(Box::new(SyntheticSource::from_url(path, settings)?))
        }
        SourceId::File(path) => {
            if path.contains("://") {
                return Err(anyhow!(
                    "file ingestion only supports local paths (no URL schemes): {}",
                    path
                ));
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Box::new(FileSource::new(path.clone())?))
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "file ingestion requires the ingest-file-ffmpeg feature"
                ))
            }
        }
        #[cfg(feature = "ingest-v4l2")]
        SourceId::Camera(index) => Ok(Box::new(CameraSource::new(*index, settings.clone()))),
        #[cfg(not(feature = "ingest-v4l2"))]
        SourceId::Camera(_) => Err(anyhow!(
            "camera ingestion requires the ingest-v4l2 feature"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_sources() -> Result<()> {
        let id = SourceId::File("stub://dashcam?frames=2".to_string());
        let mut source = open_source(&id, &IngestSettings::default())?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn rejects_remote_file_urls() {
        let id = SourceId::File("http://example.com/crash.mp4".to_string());
        assert!(open_source(&id, &IngestSettings::default()).is_err());
    }
}
