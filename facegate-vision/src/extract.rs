use image::{imageops, RgbImage};

use crate::error::{VisionError, VisionResult};
use crate::region::FaceRegion;
use crate::signature::{Signature, CANONICAL_SIZE};

/// Turns a detected face into a signature.
///
/// Matching and scanning only see [`Signature`], so a learned embedding can
/// replace the raw-pixel scheme behind this trait.
pub trait SignatureExtractor: Send + Sync {
    fn extract(&self, img: &RgbImage, region: &FaceRegion) -> VisionResult<Signature>;
}

/// Crop, resample to the canonical square and flatten row-major, channel
/// interleaved.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPixelExtractor;

impl SignatureExtractor for RawPixelExtractor {
    fn extract(&self, img: &RgbImage, region: &FaceRegion) -> VisionResult<Signature> {
        let (width, height) = img.dimensions();
        let region = region
            .clip(width, height)
            .ok_or(VisionError::EmptyRegion)?;

        let crop = imageops::crop_imm(img, region.x, region.y, region.width, region.height).to_image();
        let canonical = imageops::resize(
            &crop,
            CANONICAL_SIZE,
            CANONICAL_SIZE,
            imageops::FilterType::Triangle,
        );

        Signature::from_pixels(canonical.as_raw()).map_err(|e| {
            log::error!("canonical crop produced {e}");
            VisionError::EmptyRegion
        })
    }
}

pub fn extract(img: &RgbImage, region: &FaceRegion) -> VisionResult<Signature> {
    RawPixelExtractor.extract(img, region)
}
