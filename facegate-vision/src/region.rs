use crate::error::{VisionError, VisionResult};

/// Smallest accepted face side, relative to the shorter image dimension.
pub const MIN_RELATIVE_SIZE: f32 = 0.1;

/// Padding added on every side, relative to the shorter face side.
pub const PADDING_RATIO: f32 = 0.2;

/// Axis-aligned face rectangle in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }

    /// Intersect with a `width × height` image; `None` when nothing remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Self> {
        let x1 = self.x.saturating_add(self.width).min(width);
        let y1 = self.y.saturating_add(self.height).min(height);
        if self.x >= x1 || self.y >= y1 {
            return None;
        }
        Some(Self::new(self.x, self.y, x1 - self.x, y1 - self.y))
    }

    /// Grow symmetrically by `PADDING_RATIO * min_side`, clipped to the image.
    pub fn padded(&self, img_width: u32, img_height: u32) -> Self {
        let pad = (self.min_side() as f32 * PADDING_RATIO) as u32;
        let x0 = self.x.saturating_sub(pad);
        let y0 = self.y.saturating_sub(pad);
        let x1 = (self.x + self.width).saturating_add(pad).min(img_width);
        let y1 = (self.y + self.height).saturating_add(pad).min(img_height);
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Largest candidate by area; the earliest wins ties.
pub fn select_largest(candidates: &[FaceRegion]) -> Option<FaceRegion> {
    candidates.iter().fold(None, |best: Option<FaceRegion>, c| match best {
        Some(b) if b.area() >= c.area() => Some(b),
        _ => Some(*c),
    })
}

/// Reject faces whose shorter side is under 10% of the shorter image side.
pub fn check_size(region: &FaceRegion, img_width: u32, img_height: u32) -> VisionResult<()> {
    let floor = MIN_RELATIVE_SIZE * img_width.min(img_height) as f32;
    if (region.min_side() as f32) < floor {
        return Err(VisionError::FaceTooSmall {
            size: region.min_side(),
            minimum: floor.ceil() as u32,
        });
    }
    Ok(())
}
