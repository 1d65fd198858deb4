//! Synthetic frame source.
//!
//! `stub://<name>` URLs produce generated frames without touching a device or
//! file. Query parameters shape the stream:
//!
//! - `frames=N`: end-of-stream after N frames (default: endless)
//! - `width=W`, `height=H`: frame size (default: ingest settings)
//! - `fps=F`: pace reads to F frames per second (default: unpaced)

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};
use url::Url;

use super::{FrameSource, IngestSettings, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_interval: Option<Duration>,
    frame_count: u64,
    scene_state: u8,
    last_frame_at: Option<Instant>,
    connected: bool,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            frame_limit: None,
            frame_interval: None,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
            connected: false,
            closed: false,
        }
    }

    /// End the stream after `frames` reads.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Pace reads to `fps` frames per second.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.frame_interval = frame_interval(fps);
        self
    }

    pub fn from_url(raw: &str, settings: &IngestSettings) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("parse synthetic source url '{}'", raw))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("synthetic sources must use stub://, got '{}'", raw));
        }
        let name = url.host_str().unwrap_or("synthetic").to_string();
        let mut source = Self::new(name, settings.width, settings.height);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => {
                    let frames = parse_param(&key, &value)?;
                    source = source.with_frame_limit(frames);
                }
                "width" => source.width = parse_param(&key, &value)?,
                "height" => source.height = parse_param(&key, &value)?,
                "fps" => {
                    let fps = parse_param(&key, &value)?;
                    source = source.with_fps(fps);
                }
                other => {
                    return Err(anyhow!("unknown synthetic source parameter '{}'", other));
                }
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("synthetic frame size must be non-zero"));
        }
        Ok(source)
    }

    /// Generate a moving gradient so consecutive frames differ.
    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn pace(&self) {
        let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) else {
            return;
        };
        let elapsed = last.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        self.closed = false;
        log::info!("SyntheticSource: connected to stub://{}", self.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self.closed {
            return Ok(None);
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            log::info!(
                "SyntheticSource: stub://{} ended after {} frames",
                self.name,
                self.frame_count
            );
            return Ok(None);
        }
        self.pace();

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_synthetic_pixels();
        Frame::new(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_healthy(&self) -> bool {
        self.connected && !self.closed
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("synthetic source parameter {}='{}' is not a number", key, value))
}

fn frame_interval(fps: u32) -> Option<Duration> {
    if fps == 0 {
        return None;
    }
    Some(Duration::from_millis((1000 / fps as u64).max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> IngestSettings {
        IngestSettings {
            target_fps: 10,
            width: 8,
            height: 4,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut source = SyntheticSource::from_url("stub://test", &settings())?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.index, 1);
        Ok(())
    }

    #[test]
    fn query_overrides_size_and_limit() -> Result<()> {
        let mut source =
            SyntheticSource::from_url("stub://clip?frames=3&width=2&height=2", &settings())?;
        source.connect()?;

        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame()? {
            assert_eq!(frame.byte_len(), 12);
            indices.push(frame.index);
        }
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new("diff", 4, 4);
        source.connect()?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn closed_source_reports_end_of_stream() -> Result<()> {
        let mut source = SyntheticSource::new("closing", 2, 2);
        source.connect()?;
        source.close();
        assert!(source.next_frame()?.is_none());
        assert!(!source.is_healthy());
        Ok(())
    }

    #[test]
    fn read_before_connect_fails() {
        let mut source = SyntheticSource::new("cold", 2, 2);
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn rejects_unknown_parameters() {
        assert!(SyntheticSource::from_url("stub://x?colour=red", &settings()).is_err());
        assert!(SyntheticSource::from_url("stub://x?frames=many", &settings()).is_err());
    }
}
