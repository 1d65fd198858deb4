//! V4L2 camera source.
//!
//! Camera index N maps to `/dev/videoN`. The device is asked for RGB24 at the
//! configured size and rate; devices that cannot deliver RGB24 are rejected at
//! connect time.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{FrameSource, IngestSettings, SourceStats};
use crate::frame::Frame;

pub struct CameraSource {
    device: String,
    settings: IngestSettings,
    state: Option<CameraState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl CameraSource {
    pub fn new(index: u32, settings: IngestSettings) -> Self {
        Self {
            device: format!("/dev/video{}", index),
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn open_device(&mut self) -> Result<CameraState> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let rgb3 = v4l::FourCC::new(b"RGB3");
        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = rgb3;

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        if format.fourcc != rgb3 {
            return Err(anyhow!(
                "{} delivers {} frames; RGB3 is required",
                self.device,
                format.fourcc
            ));
        }

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        CameraStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        let state = self.open_device().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "CameraSource: connected to {} ({}x{})",
            self.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        )
        .map(Some)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("CameraSource: released {}", self.device);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_index_maps_to_device_node() {
        let source = CameraSource::new(3, IngestSettings::default());
        assert_eq!(source.stats().source, "/dev/video3");
        assert!(!source.is_healthy());
    }
}
