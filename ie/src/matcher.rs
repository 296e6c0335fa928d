//! Multi-scale template matching.
//!
//! Scores are zero-mean normalized cross-correlation (the measure OpenCV calls
//! `TM_CCOEFF_NORMED`), clamped into `[0, 1]`. Large templates are located on a
//! downsampled copy first and refined at full resolution around the best few
//! coarse peaks. Small templates, and templates whose texture does not survive
//! downsampling, are searched exhaustively.

use image::GrayImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::label::clamp_unit;
use crate::{Label, Point, Template};

/// Smallest template side (in pixels) still searched on a downsampled level.
const MIN_COARSE_SIDE: u32 = 8;
/// Coarse peaks refined at full resolution.
const COARSE_PEAKS: usize = 4;
/// Share of the template's pixel spread a downsampled copy must keep to be
/// searched at that level.
const MIN_COARSE_DETAIL: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum confidence for a placement to count as found.
    pub threshold: f32,
    /// Template scale factors tried for every reference image.
    pub scales: Vec<f32>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            scales: vec![0.90, 0.95, 1.00, 1.05, 1.10],
        }
    }
}

/// Best placement of a template inside a region (region coordinates).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub label: Label,
    pub confidence: f32,
    pub top_left: Point,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl TemplateMatch {
    pub fn center(&self) -> Point {
        Point::new(self.top_left.x + self.width / 2, self.top_left.y + self.height / 2)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateMatcher {
    config: MatcherConfig,
}

impl TemplateMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Best placement if it clears the acceptance threshold.
    pub fn find(&self, region: &GrayImage, template: &Template) -> Option<TemplateMatch> {
        self.best(region, template)
            .filter(|m| m.confidence >= self.config.threshold)
    }

    /// Best placement over every image and scale, regardless of threshold.
    ///
    /// `None` only when no scaled variant fits inside the region.
    pub fn best(&self, region: &GrayImage, template: &Template) -> Option<TemplateMatch> {
        // Stable sort: equal deviations keep configuration order.
        let mut scales = self.config.scales.clone();
        scales.sort_by(|a, b| (a - 1.0).abs().total_cmp(&(b - 1.0).abs()));

        let mut best: Option<TemplateMatch> = None;
        for reference in &template.images {
            for &scale in &scales {
                let Some(scaled) = scale_template(reference, scale) else {
                    continue;
                };
                if scaled.width() > region.width() || scaled.height() > region.height() {
                    continue;
                }

                let Some((x, y, score)) = locate(region, &scaled) else {
                    continue;
                };
                let candidate = TemplateMatch {
                    label: template.label,
                    confidence: clamp_unit(score),
                    top_left: Point::new(x, y),
                    width: scaled.width(),
                    height: scaled.height(),
                    scale,
                };

                // Strictly better only: ties stay with the scale closest to 1.0.
                if best.is_none_or(|b| candidate.confidence > b.confidence) {
                    best = Some(candidate);
                }
            }
        }
        best
    }
}

fn scale_template(reference: &GrayImage, scale: f32) -> Option<GrayImage> {
    if (scale - 1.0).abs() < f32::EPSILON {
        return Some(reference.clone());
    }
    let w = (reference.width() as f32 * scale) as u32;
    let h = (reference.height() as f32 * scale) as u32;
    if w == 0 || h == 0 {
        return None;
    }
    Some(imageops::resize(reference, w, h, FilterType::Triangle))
}

/// Best `(x, y, score)` of `template` inside `region`.
fn locate(region: &GrayImage, template: &GrayImage) -> Option<(u32, u32, f32)> {
    let (rw, rh) = region.dimensions();
    let (tw, th) = template.dimensions();
    if tw > rw || th > rh {
        return None;
    }

    let full = Correlator::new(region, template);
    let Some((factor, small_template)) = coarse_level(template) else {
        return full.best_in(0, rw - tw, 0, rh - th);
    };
    let small_region = imageops::resize(region, (rw / factor).max(1), (rh / factor).max(1), FilterType::Triangle);
    if small_template.width() > small_region.width() || small_template.height() > small_region.height() {
        return full.best_in(0, rw - tw, 0, rh - th);
    }

    let coarse = Correlator::new(&small_region, &small_template);
    let peaks = coarse.peaks(COARSE_PEAKS);

    let radius = 2 * factor;
    let mut best: Option<(u32, u32, f32)> = None;
    for (px, py) in peaks {
        let cx = px * factor;
        let cy = py * factor;
        let x0 = cx.saturating_sub(radius);
        let y0 = cy.saturating_sub(radius);
        let x1 = (cx + radius).min(rw - tw);
        let y1 = (cy + radius).min(rh - th);
        if x0 > x1 || y0 > y1 {
            continue;
        }
        if let Some(found) = full.best_in(x0, x1, y0, y1) {
            if best.is_none_or(|b| found.2 > b.2) {
                best = Some(found);
            }
        }
    }
    best
}

/// Coarsest downsampling factor (with the downsampled template) that keeps
/// both the template's size and most of its texture. `None` means search
/// at full resolution only.
fn coarse_level(template: &GrayImage) -> Option<(u32, GrayImage)> {
    let (tw, th) = template.dimensions();
    let spread = pixel_spread(template);
    if spread <= 1e-3 {
        return None;
    }

    [4, 2].into_iter().find_map(|f| {
        if tw / f < MIN_COARSE_SIDE || th / f < MIN_COARSE_SIDE {
            return None;
        }
        let small = imageops::resize(template, tw / f, th / f, FilterType::Triangle);
        (pixel_spread(&small) >= MIN_COARSE_DETAIL * spread).then_some((f, small))
    })
}

/// Standard deviation of the pixel values.
fn pixel_spread(img: &GrayImage) -> f32 {
    let raw = img.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let n = raw.len() as f32;
    let mean = raw.iter().map(|v| *v as f32).sum::<f32>() / n;
    (raw.iter().map(|v| (*v as f32 - mean).powi(2)).sum::<f32>() / n).sqrt()
}

/// Summed-area tables over pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        Self { stride, sum, sq }
    }

    /// `(sum, sum of squares)` over the `w` x `h` window at `(x, y)`.
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (u64, u64) {
        let s = self.stride;
        let (a, b, c, d) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[d] + self.sum[a] - self.sum[b] - self.sum[c],
            self.sq[d] + self.sq[a] - self.sq[b] - self.sq[c],
        )
    }
}

/// Zero-mean NCC of one template against every placement in one region.
struct Correlator<'a> {
    region: &'a GrayImage,
    integral: Integral,
    tw: usize,
    th: usize,
    /// Template with its mean subtracted, row-major.
    zero_mean: Vec<f32>,
    /// `sqrt(sum(zero_mean^2))`.
    norm: f32,
}

impl<'a> Correlator<'a> {
    fn new(region: &'a GrayImage, template: &GrayImage) -> Self {
        let raw = template.as_raw();
        let n = raw.len().max(1) as f32;
        let mean = raw.iter().map(|v| *v as f32).sum::<f32>() / n;
        let zero_mean: Vec<f32> = raw.iter().map(|v| *v as f32 - mean).collect();
        let norm = zero_mean.iter().map(|v| v * v).sum::<f32>().sqrt();

        Self {
            region,
            integral: Integral::new(region),
            tw: template.width() as usize,
            th: template.height() as usize,
            zero_mean,
            norm,
        }
    }

    fn score(&self, x: u32, y: u32) -> f32 {
        let (x, y) = (x as usize, y as usize);
        let n = (self.tw * self.th) as f64;
        let (sum, sq) = self.integral.window(x, y, self.tw, self.th);
        let variance_sum = sq as f64 - (sum as f64 * sum as f64) / n;
        // A flat window (or flat template) has nothing to correlate against.
        if variance_sum <= 1e-6 || self.norm <= 1e-6 {
            return 0.0;
        }

        let rw = self.region.width() as usize;
        let raw = self.region.as_raw();
        let mut num = 0.0f32;
        for j in 0..self.th {
            let start = (y + j) * rw + x;
            let row = &raw[start..start + self.tw];
            let trow = &self.zero_mean[j * self.tw..(j + 1) * self.tw];
            num += row.iter().zip(trow).map(|(p, t)| *p as f32 * t).sum::<f32>();
        }

        num / (self.norm * variance_sum.sqrt() as f32)
    }

    /// Best placement with top-left inside `[x0, x1] x [y0, y1]` (inclusive).
    fn best_in(&self, x0: u32, x1: u32, y0: u32, y1: u32) -> Option<(u32, u32, f32)> {
        let mut best: Option<(u32, u32, f32)> = None;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let s = self.score(x, y);
                if best.is_none_or(|b| s > b.2) {
                    best = Some((x, y, s));
                }
            }
        }
        best
    }

    /// Up to `k` well separated local maxima of the full score map.
    fn peaks(&self, k: usize) -> Vec<(u32, u32)> {
        let max_x = self.region.width() - self.tw as u32;
        let max_y = self.region.height() - self.th as u32;

        let mut scored = Vec::with_capacity(((max_x + 1) * (max_y + 1)) as usize);
        for y in 0..=max_y {
            for x in 0..=max_x {
                scored.push((self.score(x, y), x, y));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let sep_x = (self.tw as u32 / 2).max(1);
        let sep_y = (self.th as u32 / 2).max(1);
        let mut picked: Vec<(u32, u32)> = Vec::with_capacity(k);
        for (_, x, y) in scored {
            if picked.len() == k {
                break;
            }
            let close = picked
                .iter()
                .any(|(px, py)| px.abs_diff(x) < sep_x && py.abs_diff(y) < sep_y);
            if !close {
                picked.push((x, y));
            }
        }
        picked
    }
}
