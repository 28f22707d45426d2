//! Boosted cascades of Haar-like features (Viola-Jones).
//!
//! Cascades are read from JSON documents that describe the base detection
//! window and a list of stages. Each stage sums the votes of its weak
//! classifiers; a window survives the cascade only if every stage sum reaches
//! the stage threshold.
//!
//! Raw hits are scanned over a scale pyramid and grouped: overlapping hits are
//! merged into one averaged rectangle, and groups with too few members
//! (`min_neighbors`) are dropped.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image};
use serde::{Deserialize, Serialize};

use crate::opencv_xml;
use crate::region::FaceRegion;

/// Relative edge tolerance when merging raw hits.
const GROUP_EPS: f32 = 0.2;

/// One detector attempt's parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Window growth per pyramid level, must be > 1.
    pub scale_factor: f32,
    /// Hits a group needs beyond the first to be reported.
    pub min_neighbors: u32,
    /// Smallest window side, in pixels.
    pub min_size: u32,
}

/// A face detector model that proposes candidate rectangles.
pub trait CascadeModel: Send + Sync {
    fn name(&self) -> &str;

    fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<FaceRegion>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaarCascade {
    #[serde(default)]
    pub name: String,
    /// Base window `[width, height]`.
    pub window: [u32; 2],
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub rects: Vec<WeightedRect>,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

struct Integrals {
    sum: ImageBuffer<Luma<u32>, Vec<u32>>,
    sq: ImageBuffer<Luma<u64>, Vec<u64>>,
}

impl Integrals {
    fn new(gray: &GrayImage) -> Self {
        Self {
            sum: integral_image::<_, u32>(gray),
            sq: integral_squared_image::<_, u64>(gray),
        }
    }

    fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let at = |px: u32, py: u32| self.sum.get_pixel(px, py)[0] as f64;
        at(x + w, y + h) - at(x, y + h) - at(x + w, y) + at(x, y)
    }

    fn rect_sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let at = |px: u32, py: u32| self.sq.get_pixel(px, py)[0] as f64;
        at(x + w, y + h) - at(x, y + h) - at(x + w, y) + at(x, y)
    }
}

impl HaarCascade {
    /// Load a cascade from an OpenCV `.xml` file or a `.json` document.
    pub fn load(path: &Path) -> Result<Self> {
        let is_xml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        let mut cascade = if is_xml {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("opening cascade {}", path.display()))?;
            opencv_xml::parse(&text)
                .with_context(|| format!("parsing cascade {}", path.display()))?
        } else {
            let file =
                File::open(path).with_context(|| format!("opening cascade {}", path.display()))?;
            serde_json::from_reader::<_, HaarCascade>(BufReader::new(file))
                .with_context(|| format!("parsing cascade {}", path.display()))?
        };
        cascade
            .validate()
            .with_context(|| format!("invalid cascade {}", path.display()))?;
        if cascade.name.is_empty() {
            cascade.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        log::debug!(
            "loaded cascade {} ({} stages, window {}x{})",
            cascade.name,
            cascade.stages.len(),
            cascade.window[0],
            cascade.window[1]
        );
        Ok(cascade)
    }

    /// Every feature rectangle must lie inside a non-empty base window.
    pub fn validate(&self) -> Result<()> {
        let [win_w, win_h] = self.window;
        if win_w == 0 || win_h == 0 {
            anyhow::bail!("empty base window {win_w}x{win_h}");
        }
        for (s, stage) in self.stages.iter().enumerate() {
            for weak in &stage.classifiers {
                for r in &weak.rects {
                    let fits_x = r.x.checked_add(r.width).is_some_and(|end| end <= win_w);
                    let fits_y = r.y.checked_add(r.height).is_some_and(|end| end <= win_h);
                    if !fits_x || !fits_y {
                        anyhow::bail!(
                            "stage {s}: rect {}x{} at ({}, {}) leaves the {win_w}x{win_h} window",
                            r.width,
                            r.height,
                            r.x,
                            r.y
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn accepts(&self, integrals: &Integrals, x: u32, y: u32, scale: f32, win: (u32, u32)) -> bool {
        let area = (win.0 * win.1) as f64;
        let mean = integrals.rect_sum(x, y, win.0, win.1) / area;
        let variance = integrals.rect_sq_sum(x, y, win.0, win.1) / area - mean * mean;
        let std_dev = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for weak in &stage.classifiers {
                let mut feature = 0.0f64;
                for r in &weak.rects {
                    let rx = x + (r.x as f32 * scale) as u32;
                    let ry = y + (r.y as f32 * scale) as u32;
                    let rw = ((r.width as f32 * scale) as u32).min(x + win.0 - rx);
                    let rh = ((r.height as f32 * scale) as u32).min(y + win.1 - ry);
                    feature += integrals.rect_sum(rx, ry, rw, rh) * r.weight as f64;
                }
                stage_sum += if feature / area < weak.threshold as f64 * std_dev {
                    weak.left
                } else {
                    weak.right
                };
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }

    fn raw_hits(&self, gray: &GrayImage, params: &DetectParams) -> Vec<FaceRegion> {
        let (img_w, img_h) = gray.dimensions();
        let integrals = Integrals::new(gray);
        let mut hits = Vec::new();

        let mut scale = 1.0f32;
        loop {
            let win_w = (self.window[0] as f32 * scale).round() as u32;
            let win_h = (self.window[1] as f32 * scale).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }
            if win_w >= params.min_size && win_h >= params.min_size {
                let step = ((scale * 2.0).round() as usize).max(1);
                for y in (0..=img_h - win_h).step_by(step) {
                    for x in (0..=img_w - win_w).step_by(step) {
                        if self.accepts(&integrals, x, y, scale, (win_w, win_h)) {
                            hits.push(FaceRegion::new(x, y, win_w, win_h));
                        }
                    }
                }
            }
            scale *= params.scale_factor;
        }

        hits
    }
}

impl CascadeModel for HaarCascade {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<FaceRegion> {
        if let Err(e) = self.validate() {
            log::warn!("{}: {e}, skipping", self.name);
            return Vec::new();
        }
        if params.scale_factor <= 1.0 {
            log::warn!(
                "{}: scale factor {} must exceed 1.0, skipping",
                self.name,
                params.scale_factor
            );
            return Vec::new();
        }
        let hits = self.raw_hits(gray, params);
        let grouped = group_rectangles(&hits, params.min_neighbors);
        log::debug!(
            "{}: {} raw hits, {} grouped (scale {}, neighbors {})",
            self.name,
            hits.len(),
            grouped.len(),
            params.scale_factor,
            params.min_neighbors
        );
        grouped
    }
}

fn similar(a: &FaceRegion, b: &FaceRegion) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge similar rectangles, keeping groups with more than `min_neighbors`
/// members. Groups come out in order of their first member.
pub fn group_rectangles(rects: &[FaceRegion], min_neighbors: u32) -> Vec<FaceRegion> {
    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    // (root, count, sums of x, y, w, h)
    let mut groups: Vec<(usize, u64, [u64; 4])> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let idx = match groups.iter().position(|g| g.0 == root) {
            Some(idx) => idx,
            None => {
                groups.push((root, 0, [0; 4]));
                groups.len() - 1
            }
        };
        let g = &mut groups[idx];
        g.1 += 1;
        g.2[0] += r.x as u64;
        g.2[1] += r.y as u64;
        g.2[2] += r.width as u64;
        g.2[3] += r.height as u64;
    }

    groups
        .into_iter()
        .filter(|(_, count, _)| *count > min_neighbors as u64)
        .map(|(_, count, s)| {
            let avg = |v: u64| ((v as f64) / count as f64).round() as u32;
            FaceRegion::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect()
}
