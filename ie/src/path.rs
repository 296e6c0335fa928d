//! Drag gestures: the dark trail drawn inside a fixed zone of the frame,
//! followed left to right.

use imageproc::contrast::{threshold, ThresholdType};
use serde::{Deserialize, Serialize};

use crate::{contour, HsvBand, Image, Point, Region};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Where the trail is drawn, in frame coordinates.
    pub zone: Region,
    /// Pixels with luma at or below this are trail.
    pub dark_threshold: u8,
    /// Colour used when nothing dark enough is in the zone.
    pub fallback: Option<HsvBand>,
    /// Roughly how many points the trail is reduced to.
    pub samples: usize,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            zone: Region::new(1205, 375, 275, 185),
            dark_threshold: 180,
            fallback: Some(HsvBand::new([10, 20, 100], [30, 150, 200])),
            samples: 20,
        }
    }
}

/// A trail in frame coordinates, ordered left to right. Always holds at
/// least two points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPath {
    points: Vec<Point>,
}

impl DragPath {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn start(&self) -> Point {
        self.points[0]
    }

    pub fn end(&self) -> Point {
        self.points[self.points.len() - 1]
    }
}

/// Trace the largest trail inside the configured zone.
pub fn trace_path(frame: Image, config: &PathConfig) -> Option<DragPath> {
    let zone = config.zone.padded(0, frame.width(), frame.height());
    if zone.width == 0 || zone.height == 0 {
        return None;
    }
    let view = frame.sub_image(zone.x, zone.y, zone.width, zone.height);

    let gray = view.to_gray_image();
    let ink = threshold(&gray, config.dark_threshold, ThresholdType::BinaryInverted);
    let ink = contour::open(&contour::close(&ink, 5), 3);

    let trail = largest_border(&ink).or_else(|| {
        let band = config.fallback?;
        tracing::debug!("no dark trail; trying colour fallback");
        largest_border(&contour::close(&view.to_hsv().in_range(&band), 5))
    })?;

    let mut points = trail;
    points.sort_by_key(|p| p.x);
    let step = (points.len() / config.samples.max(1)).max(1);
    let last = points[points.len() - 1];
    let mut sampled = points.into_iter().step_by(step).collect::<Vec<_>>();
    if sampled.last() != Some(&last) {
        sampled.push(last);
    }
    if sampled.len() < 2 {
        return None;
    }

    let origin = view.origin();
    Some(DragPath {
        points: sampled.into_iter().map(|p| p.offset(origin)).collect(),
    })
}

fn largest_border(mask: &image::GrayImage) -> Option<Vec<Point>> {
    contour::find_blobs(mask)
        .into_iter()
        .max_by(|a, b| a.area.total_cmp(&b.area))
        .map(|b| b.points)
        .filter(|p| !p.is_empty())
}
