//! Face region detection with an ordered fallback over detector configurations.

use std::path::PathBuf;

use anyhow::Result;
use image::{imageops, GrayImage, RgbImage};
use once_cell::sync::OnceCell;

use crate::cascade::{CascadeModel, DetectParams, HaarCascade};
use crate::error::{VisionError, VisionResult};
use crate::region::{self, FaceRegion};

/// Smallest window side every attempt scans.
pub const MIN_WINDOW: u32 = 30;

// coarse to fine pyramid, strict to loose grouping
const SCALE_FACTORS: [f32; 3] = [1.2, 1.1, 1.05];
const MIN_NEIGHBORS: [u32; 3] = [5, 4, 3];

static GLOBAL: OnceCell<RegionDetector> = OnceCell::new();

/// One step of the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Index into the detector's model list.
    pub model: usize,
    pub scale_factor: f32,
    pub min_neighbors: u32,
}

/// The default ladder: every model, scale factor and neighbor count, in that
/// nesting order.
///
/// Each step is at least as permissive as the one before it on the same model
/// and scale: a lower neighbor count keeps every group a higher one kept.
pub fn default_ladder(models: usize) -> Vec<DetectorConfig> {
    (0..models)
        .flat_map(|model| {
            SCALE_FACTORS.iter().flat_map(move |&scale_factor| {
                MIN_NEIGHBORS.iter().map(move |&min_neighbors| DetectorConfig {
                    model,
                    scale_factor,
                    min_neighbors,
                })
            })
        })
        .collect()
}

pub struct RegionDetector {
    models: Vec<Box<dyn CascadeModel>>,
    ladder: Vec<DetectorConfig>,
}

impl RegionDetector {
    pub fn new(models: Vec<Box<dyn CascadeModel>>) -> Self {
        let ladder = default_ladder(models.len());
        Self { models, ladder }
    }

    pub fn with_ladder(models: Vec<Box<dyn CascadeModel>>, ladder: Vec<DetectorConfig>) -> Self {
        Self { models, ladder }
    }

    /// Load Haar cascades from JSON files, in fallback order.
    pub fn from_cascade_files(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            anyhow::bail!("no cascade models configured");
        }
        let models = paths
            .iter()
            .map(|p| HaarCascade::load(p).map(|c| Box::new(c) as Box<dyn CascadeModel>))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(models))
    }

    /// Install the process-wide detector. Later calls return the first one.
    pub fn install(detector: RegionDetector) -> &'static RegionDetector {
        GLOBAL.get_or_init(|| detector)
    }

    /// Load the process-wide detector from cascade files on first use.
    pub fn global(paths: &[PathBuf]) -> Result<&'static RegionDetector> {
        GLOBAL.get_or_try_init(|| Self::from_cascade_files(paths))
    }

    pub fn ladder(&self) -> &[DetectorConfig] {
        &self.ladder
    }

    /// Find the most plausible face, padded and clipped to the image.
    pub fn detect(&self, img: &RgbImage) -> VisionResult<FaceRegion> {
        let (width, height) = img.dimensions();
        let gray = equalized_gray(img);

        for (step, cfg) in self.ladder.iter().enumerate() {
            let Some(model) = self.models.get(cfg.model) else {
                log::warn!("ladder step {} names missing model {}", step, cfg.model);
                continue;
            };
            let params = DetectParams {
                scale_factor: cfg.scale_factor,
                min_neighbors: cfg.min_neighbors,
                min_size: MIN_WINDOW,
            };
            let candidates: Vec<FaceRegion> = model
                .detect_multi_scale(&gray, &params)
                .into_iter()
                .filter_map(|r| r.clip(width, height))
                .collect();

            if let Some(best) = region::select_largest(&candidates) {
                log::debug!(
                    "{} found {} candidate(s) at step {} (scale {}, neighbors {})",
                    model.name(),
                    candidates.len(),
                    step,
                    cfg.scale_factor,
                    cfg.min_neighbors
                );
                region::check_size(&best, width, height)?;
                return Ok(best.padded(width, height));
            }
        }

        Err(VisionError::NoFaceDetected)
    }
}

/// Grayscale with histogram equalization, for robustness to lighting.
pub fn equalized_gray(img: &RgbImage) -> GrayImage {
    let gray = imageops::grayscale(img);
    imageproc::contrast::equalize_histogram(&gray)
}
