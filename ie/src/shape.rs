//! Colour/shape heuristics: large, roughly round blobs of a button colour.

use serde::{Deserialize, Serialize};

use crate::{contour, HsvBand, HsvImage, Label, Point};

/// Confidence never exceeds this for a shape-only detection.
pub const SHAPE_CONFIDENCE_CAP: f64 = 0.8;

/// Area that contributes a full 1.0 to the confidence score.
const AREA_SCALE: f64 = 20000.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ShapeSpec {
	pub label: Label,
	/// Short colour name used in detection reasons.
	pub name: String,
	pub band: HsvBand,
	pub min_area: f64,
	pub min_circularity: f64,
}

impl ShapeSpec {
	pub fn new(label: Label, name: &str, band: HsvBand, min_area: f64, min_circularity: f64) -> Self {
		Self {
			label,
			name: name.to_string(),
			band,
			min_area,
			min_circularity,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeHit {
	pub label: Label,
	pub name: String,
	pub confidence: f32,
	pub center: Point,
	pub area: f64,
	pub circularity: f64,
}

pub struct ShapeDetector {
	threshold: f32,
}

impl ShapeDetector {
	pub fn new(threshold: f32) -> Self {
		Self { threshold }
	}

	/// Best qualifying blob across all specs, or `None` if the best scores
	/// below the acceptance threshold.
	///
	/// A later spec or contour only replaces the incumbent when strictly
	/// better, so ties go to the earlier spec.
	pub fn detect(&self, hsv: &HsvImage, specs: &[ShapeSpec]) -> Option<ShapeHit> {
		let mut best: Option<ShapeHit> = None;

		for spec in specs {
			let mask = hsv.in_range(&spec.band);
			let mask = contour::open(&contour::close(&mask, 5), 5);

			for blob in contour::find_blobs(&mask) {
				if blob.area <= spec.min_area || blob.circularity <= spec.min_circularity {
					continue;
				}

				let confidence = (blob.circularity + blob.area / AREA_SCALE).min(SHAPE_CONFIDENCE_CAP) as f32;
				if best.as_ref().is_some_and(|b| b.confidence >= confidence) {
					continue;
				}

				best = Some(ShapeHit {
					label: spec.label,
					name: spec.name.clone(),
					confidence,
					center: blob.bounds.center(),
					area: blob.area,
					circularity: blob.circularity,
				});
			}
		}

		let best = best?;
		tracing::trace!(label = %best.label, confidence = best.confidence, "best shape candidate");
		(best.confidence >= self.threshold).then_some(best)
	}
}
