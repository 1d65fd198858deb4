//! Local video file source using FFmpeg.
//!
//! Decodes the best video stream of a local file into RGB24 frames. When the
//! demuxer runs out of packets the decoder is flushed, remaining frames are
//! delivered, and then the source reports end-of-stream.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub struct FileSource {
    path: String,
    state: Option<DecodeState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    flushed: bool,
}

impl FileSource {
    pub fn new(path: String) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(anyhow!("file source path must not be empty"));
        }
        Ok(Self {
            path,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn open_decoder(&self) -> Result<DecodeState> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&self.path)
            .with_context(|| format!("failed to open file input '{}' with ffmpeg", self.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(DecodeState {
            input,
            stream_index,
            decoder,
            scaler,
            flushed: false,
        })
    }

    fn health_grace(&self) -> Duration {
        Duration::from_secs(2)
    }
}

impl DecodeState {
    /// Feed the decoder one packet of our stream, or flush it at end of input.
    fn feed(&mut self) -> Result<()> {
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            return Ok(());
        }
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.flushed = true;
        Ok(())
    }

    fn next_rgb(&mut self) -> Result<Option<(Vec<u8>, u32, u32)>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                return frame_to_pixels(&rgb_frame).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            self.feed()?;
        }
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        let state = self.open_decoder().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.connected_at = Some(Instant::now());
        log::info!("FileSource: connected to {} (ffmpeg)", self.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let next = state.next_rgb().map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        let Some((pixels, width, height)) = next else {
            log::info!(
                "FileSource: {} ended after {} frames",
                self.path,
                self.frame_count
            );
            self.state = None;
            return Ok(None);
        };

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height, self.frame_count).map(Some)
    }

    fn close(&mut self) {
        self.state = None;
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() || self.state.is_none() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
