//! Decoded video frames.
//!
//! A `Frame` owns tightly packed RGB24 pixels. Sources create frames, the
//! detection loop lends them to the detector and presenter, and they are
//! dropped at the end of the iteration.

use anyhow::{anyhow, Result};
use std::time::Instant;

pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// 1-based position in the source's stream.
    pub index: u64,

    captured_at: Instant,
}

impl Frame {
    /// Wrap RGB24 pixels. Rejects buffers whose length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Milliseconds since the source produced this frame.
    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_length_mismatch() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(frame.pixels().len(), 12);
    }

    #[test]
    fn debug_does_not_dump_pixels() {
        let frame = Frame::new(vec![7u8; 12], 2, 2, 3).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("index: 3"));
        assert!(!rendered.contains("data"));
    }
}
