use anyhow::{anyhow, Result};

/// Box corners in normalized 0..1 coordinates, `(ymin, xmin, ymax, xmax)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoundingBox {
    pub fn new(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }

    /// Box covering the whole frame.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn validate(&self) -> Result<()> {
        let corners = [self.ymin, self.xmin, self.ymax, self.xmax];
        if corners
            .iter()
            .any(|v| !v.is_finite() || !(0.0..=1.0).contains(v))
        {
            return Err(anyhow!("box {:?} is outside normalized range", self));
        }
        if self.ymin > self.ymax || self.xmin > self.xmax {
            return Err(anyhow!("box {:?} has inverted corners", self));
        }
        Ok(())
    }

    /// Pixel rectangle `(x0, y0, x1, y1)` for a frame of the given size.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let scale = |v: f32, extent: u32| (v.clamp(0.0, 1.0) * extent as f32) as u32;
        (
            scale(self.xmin, width),
            scale(self.ymin, height),
            scale(self.xmax, width),
            scale(self.ymax, height),
        )
    }
}

/// One candidate returned by a detector for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence,
        }
    }

    /// Reject malformed detector output.
    pub fn validate(&self) -> Result<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence {} for '{}' is outside [0, 1]",
                self.confidence,
                self.label
            ));
        }
        self.bbox.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_confidence() {
        let ok = Detection::new(BoundingBox::full(), "crash", 0.93);
        assert!(ok.validate().is_ok());

        let nan = Detection::new(BoundingBox::full(), "crash", f32::NAN);
        assert!(nan.validate().is_err());

        let over = Detection::new(BoundingBox::full(), "crash", 1.5);
        assert!(over.validate().is_err());
    }

    #[test]
    fn rejects_malformed_boxes() {
        assert!(BoundingBox::new(0.5, 0.1, 0.2, 0.9).validate().is_err());
        assert!(BoundingBox::new(-0.1, 0.0, 0.5, 0.5).validate().is_err());
        assert!(BoundingBox::new(0.1, 0.2, 0.3, 0.4).validate().is_ok());
    }

    #[test]
    fn converts_to_pixel_rectangle() {
        let bbox = BoundingBox::new(0.25, 0.5, 0.75, 1.0);
        assert_eq!(bbox.to_pixels(640, 480), (320, 120, 640, 360));
    }
}
