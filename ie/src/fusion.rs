//! Combines the detectors into one [`Detection`] per frame.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
	ConfigurationError, Detection, DetectionDegraded, HsvBand, Image, Label, MatcherConfig, Method, PhraseSet,
	ShapeDetector, ShapeSpec, TemplateBank, TemplateMatcher, TextConfig, TextRecognizer,
	text::MatchKind,
};

/// Anything that turns a frame into exactly one detection.
pub trait Perception: Send {
	fn perceive(&self, frame: Image) -> Detection;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
	/// Templates, then OCR, then shape heuristics.
	#[default]
	Hybrid,
	/// Templates only.
	TemplateOnly,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
	pub mode: FusionMode,
	/// Fraction of the frame width, on the right, that is never searched.
	pub panel_fraction: f32,
	pub matcher: MatcherConfig,
	pub text: TextConfig,
	pub shape_threshold: f32,
}

impl Default for FusionConfig {
	fn default() -> Self {
		Self {
			mode: FusionMode::Hybrid,
			panel_fraction: 0.25,
			matcher: MatcherConfig::default(),
			text: TextConfig::default(),
			shape_threshold: 0.4,
		}
	}
}

/// Everything the detectors look for. Built once, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
	templates: TemplateBank,
	phrases: Vec<PhraseSet>,
	shapes: Vec<ShapeSpec>,
}

impl Catalogue {
	pub fn new(templates: TemplateBank, phrases: Vec<PhraseSet>, shapes: Vec<ShapeSpec>) -> Result<Self, ConfigurationError> {
		for set in &phrases {
			if !set.label.is_actionable() {
				return Err(ConfigurationError::SentinelLabel(set.label));
			}
			if set.phrases.is_empty() && set.variants.is_empty() {
				return Err(ConfigurationError::EmptyEntry(set.label));
			}
		}
		if let Some(spec) = shapes.iter().find(|s| !s.label.is_actionable()) {
			return Err(ConfigurationError::SentinelLabel(spec.label));
		}

		Ok(Self { templates, phrases, shapes })
	}

	pub fn templates(&self) -> &TemplateBank {
		&self.templates
	}

	pub fn phrases(&self) -> &[PhraseSet] {
		&self.phrases
	}

	pub fn shapes(&self) -> &[ShapeSpec] {
		&self.shapes
	}
}

pub const GREEN: HsvBand = HsvBand::new([35, 100, 100], [85, 255, 255]);
pub const GREEN_WIDE: HsvBand = HsvBand::new([35, 80, 80], [85, 255, 255]);
pub const GRAY: HsvBand = HsvBand::new([0, 0, 60], [180, 30, 180]);

/// Captions of the driven card game's buttons.
pub fn default_phrases() -> Vec<PhraseSet> {
	vec![
		PhraseSet::new(Label::PrimaryAction, &["العب بلوت", "لعب بلوت", "العب يلوت", "بلوت", "العب"], 0.9)
			.with_variants(&["play", "baloot"]),
		PhraseSet::new(Label::ConfirmReturnDelayed, &["عودة", "العودة", "عوده", "رجوع"], 0.85)
			.with_variants(&["return", "back"])
			.with_tint(GREEN),
		PhraseSet::new(Label::ConfirmReturnImmediate, &["عودة", "العودة", "عوده", "رجوع"], 0.85)
			.with_variants(&["return", "back"]),
		PhraseSet::new(Label::ExitAction, &["مغادرة", "مغادره", "خروج"], 0.85).with_variants(&["leave", "exit"]),
		PhraseSet::new(Label::SecondaryReward, &["استلم", "استلام"], 0.85).with_variants(&["claim", "collect"]),
		PhraseSet::new(Label::Acknowledge, &["موافق", "موافقة"], 0.85).with_variants(&["ok", "agree"]),
	]
}

pub fn default_shapes() -> Vec<ShapeSpec> {
	vec![
		ShapeSpec::new(Label::PrimaryAction, "green", GREEN, 8000.0, 0.5),
		ShapeSpec::new(Label::ConfirmReturnDelayed, "green", GREEN_WIDE, 2000.0, 0.3),
		ShapeSpec::new(Label::ExitAction, "gray", GRAY, 2000.0, 0.3),
	]
}

pub struct Engine {
	catalogue: Arc<Catalogue>,
	mode: FusionMode,
	panel_fraction: f32,
	matcher: TemplateMatcher,
	text: TextRecognizer,
	shape: ShapeDetector,
}

impl Engine {
	pub fn new(catalogue: Arc<Catalogue>, config: FusionConfig, text: TextRecognizer) -> Self {
		if let Some(note) = text.degraded() {
			tracing::warn!(%note, "running without text recognition");
		}
		Self {
			catalogue,
			mode: config.mode,
			panel_fraction: config.panel_fraction.clamp(0.0, 1.0),
			matcher: TemplateMatcher::new(config.matcher),
			text,
			shape: ShapeDetector::new(config.shape_threshold),
		}
	}

	pub fn catalogue(&self) -> &Arc<Catalogue> {
		&self.catalogue
	}

	/// Reduced-capability notes, empty when every detector is available.
	pub fn degraded(&self) -> Vec<DetectionDegraded> {
		self.text.degraded().into_iter().cloned().collect()
	}

	/// The part of `frame` that is searched: the right-hand panel is cut off.
	pub fn working_region<'a>(&self, frame: Image<'a>) -> Image<'a> {
		let keep = (frame.width() as f32 * (1.0 - self.panel_fraction)).round() as u32;
		frame.trimmed_left(keep)
	}

	fn by_template(&self, region: Image) -> Option<Detection> {
		if self.catalogue.templates.is_empty() {
			return None;
		}
		let gray = region.to_gray_image();

		Label::PRIORITY.into_iter().find_map(|label| {
			let template = self.catalogue.templates.get(label)?;
			let m = self.matcher.find(&gray, template)?;
			Some(Detection::found(
				label,
				m.confidence,
				m.center().offset(region.origin()),
				Method::Template,
				format!("template match (scale {:.2})", m.scale),
			))
		})
	}
}

impl Perception for Engine {
	fn perceive(&self, frame: Image) -> Detection {
		let region = self.working_region(frame);
		if region.width() == 0 || region.height() == 0 {
			return Detection::idle();
		}

		if let Some(d) = self.by_template(region) {
			tracing::debug!(label = %d.label(), confidence = d.confidence(), "template detection");
			return d;
		}
		if self.mode == FusionMode::TemplateOnly {
			return Detection::idle();
		}

		let hsv = region.to_hsv();

		if let Some(hit) = self.text.recognize(region, &hsv, &self.catalogue.phrases) {
			let kind = match hit.found.kind {
				MatchKind::Full => "full",
				MatchKind::Partial => "partial",
			};
			tracing::debug!(label = %hit.found.label, text = %hit.text, "text detection");
			return Detection::found(
				hit.found.label,
				hit.found.confidence,
				hit.center,
				Method::Text,
				format!("ocr: '{}' ({kind})", hit.found.phrase),
			);
		}

		if let Some(hit) = self.shape.detect(&hsv, &self.catalogue.shapes) {
			tracing::debug!(label = %hit.label, confidence = hit.confidence, "shape detection");
			return Detection::found(
				hit.label,
				hit.confidence,
				hit.center.offset(region.origin()),
				Method::Shape,
				format!("shape: {} blob circ={:.2} area={:.0}", hit.name, hit.circularity, hit.area),
			);
		}

		Detection::idle()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_catalogue_is_valid() {
		let catalogue = Catalogue::new(TemplateBank::default(), default_phrases(), default_shapes()).expect("valid");
		assert_eq!(catalogue.phrases().len(), Label::PRIORITY.len());
		assert!(catalogue.templates().is_empty());
	}

	#[test]
	fn sentinel_and_empty_entries_are_rejected() {
		let err = Catalogue::new(TemplateBank::default(), vec![PhraseSet::new(Label::Idle, &["x"], 1.0)], vec![]).unwrap_err();
		assert!(matches!(err, ConfigurationError::SentinelLabel(Label::Idle)));

		let err = Catalogue::new(TemplateBank::default(), vec![PhraseSet::new(Label::Acknowledge, &[], 1.0)], vec![]).unwrap_err();
		assert!(matches!(err, ConfigurationError::EmptyEntry(Label::Acknowledge)));
	}
}
