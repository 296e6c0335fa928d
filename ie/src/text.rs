//! Button captions read through OCR and matched against phrase sets.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    contour, mask_union, DetectionDegraded, HsvBand, HsvImage, Image, Label, OcrBackend, Layout,
    OwnedImage, Point, Region,
};

/// Partial (prefix/suffix) matches are worth this fraction of the set weight.
pub const PARTIAL_FACTOR: f32 = 0.7;

/// Prefix/suffix length used for partial matches, in chars.
const FRAGMENT: usize = 3;

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x{0600}-\x{06FF}\sa-zA-Z]").expect("static regex"));

/// Phrases identifying one label, in the interface's language plus common
/// transliterations and OCR confusions.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PhraseSet {
    pub label: Label,
    pub phrases: Vec<String>,
    #[serde(default)]
    pub variants: Vec<String>,
    pub weight: f32,
    /// When set, the candidate's centre pixel must fall inside this band.
    #[serde(default)]
    pub tint: Option<HsvBand>,
}

impl PhraseSet {
    pub fn new(label: Label, phrases: &[&str], weight: f32) -> Self {
        Self {
            label,
            phrases: phrases.iter().map(|s| s.to_string()).collect(),
            variants: Vec::new(),
            weight,
            tint: None,
        }
    }

    pub fn with_variants(mut self, variants: &[&str]) -> Self {
        self.variants = variants.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tint(mut self, tint: HsvBand) -> Self {
        self.tint = Some(tint);
        self
    }

    fn all(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().chain(&self.variants).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Full,
    Partial,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    pub label: Label,
    pub confidence: f32,
    pub kind: MatchKind,
    /// The phrase (or variant) that matched.
    pub phrase: String,
}

/// Lowercase, replace anything outside Arabic / ASCII letters / whitespace
/// with a space, collapse whitespace and trim. Idempotent.
pub fn clean_text(text: &str) -> String {
    let lower = text.to_lowercase();
    NOISE
        .replace_all(&lower, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Match `text` against `sets`, consulted in label priority order.
///
/// Any full match beats any partial match; among matches of the same kind the
/// higher-priority set wins.
pub fn fuzzy_match<'a>(text: &str, sets: impl IntoIterator<Item = &'a PhraseSet>) -> Option<PhraseMatch> {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return None;
    }

    let mut sets = sets.into_iter().collect::<Vec<_>>();
    sets.sort_by_key(|s| s.label.rank());

    let full = sets.iter().find_map(|set| {
        set.all()
            .map(clean_text)
            .find(|p| !p.is_empty() && cleaned.contains(p.as_str()))
            .map(|phrase| PhraseMatch {
                label: set.label,
                confidence: set.weight,
                kind: MatchKind::Full,
                phrase,
            })
    });
    if full.is_some() {
        return full;
    }

    sets.iter().find_map(|set| {
        set.all()
            .map(clean_text)
            .find(|p| {
                let chars = p.chars().collect::<Vec<_>>();
                if chars.len() < FRAGMENT {
                    return false;
                }
                let prefix = chars[..FRAGMENT].iter().collect::<String>();
                let suffix = chars[chars.len() - FRAGMENT..].iter().collect::<String>();
                cleaned.contains(&prefix) || cleaned.contains(&suffix)
            })
            .map(|phrase| PhraseMatch {
                label: set.label,
                confidence: set.weight * PARTIAL_FACTOR,
                kind: MatchKind::Partial,
                phrase,
            })
    })
}

/// Segmentation and acceptance parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TextConfig {
    pub threshold: f32,
    /// Colour bands whose union marks candidate buttons.
    pub bands: Vec<HsvBand>,
    pub min_area: f64,
    pub max_area: f64,
    pub padding: u32,
    pub upscale: u32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            bands: vec![
                HsvBand::new([35, 100, 100], [85, 255, 255]),
                HsvBand::new([0, 0, 60], [180, 30, 180]),
                HsvBand::new([100, 80, 80], [130, 255, 255]),
            ],
            min_area: 3000.0,
            max_area: 50000.0,
            padding: 20,
            upscale: 3,
        }
    }
}

/// A phrase match located on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    pub found: PhraseMatch,
    pub center: Point,
    pub text: String,
}

/// A button-coloured blob and the padded area handed to OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub bounds: Region,
    pub crop: Region,
}

pub struct TextRecognizer {
    ocr: Option<Box<dyn OcrBackend>>,
    degraded: Option<DetectionDegraded>,
    config: TextConfig,
}

impl TextRecognizer {
    pub fn new(ocr: Box<dyn OcrBackend>, config: TextConfig) -> Self {
        Self {
            ocr: Some(ocr),
            degraded: None,
            config,
        }
    }

    /// A recognizer without OCR. It never finds anything.
    pub fn unavailable(reason: impl Into<String>, config: TextConfig) -> Self {
        Self {
            ocr: None,
            degraded: Some(DetectionDegraded {
                detector: "text",
                reason: reason.into(),
            }),
            config,
        }
    }

    pub fn is_available(&self) -> bool {
        self.ocr.is_some()
    }

    pub fn degraded(&self) -> Option<&DetectionDegraded> {
        self.degraded.as_ref()
    }

    pub fn config(&self) -> &TextConfig {
        &self.config
    }

    /// Button-coloured blobs, in contour order.
    pub fn candidates(&self, hsv: &HsvImage) -> Vec<Candidate> {
        let Some(mask) = self
            .config
            .bands
            .iter()
            .map(|band| hsv.in_range(band))
            .reduce(|a, b| mask_union(&a, &b))
        else {
            return Vec::new();
        };
        let mask = contour::close(&mask, 7);

        contour::find_blobs(&mask)
            .into_iter()
            .filter(|b| (self.config.min_area..=self.config.max_area).contains(&b.area))
            .map(|b| Candidate {
                bounds: b.bounds,
                crop: b.bounds.padded(self.config.padding, hsv.width(), hsv.height()),
            })
            .collect()
    }

    /// First candidate whose caption matches an eligible phrase set with
    /// confidence at or above the threshold.
    ///
    /// `hsv` must be the HSV rendition of `region`.
    pub fn recognize(&self, region: Image, hsv: &HsvImage, sets: &[PhraseSet]) -> Option<TextHit> {
        let ocr = self.ocr.as_deref()?;

        for Candidate { bounds, crop } in self.candidates(hsv) {
            let center = bounds.center();
            let tint = hsv.get(center.x, center.y);
            let eligible = sets
                .iter()
                .filter(|s| s.tint.is_none_or(|band| tint.is_some_and(|t| band.contains(t))));

            let view = region.sub_image(crop.x, crop.y, crop.width, crop.height);
            let text = match self.read(ocr, view) {
                Ok(text) => text,
                Err(err) => {
                    tracing::debug!(error = %err, ?bounds, "could not prepare ocr crop");
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            tracing::trace!(?bounds, text = %text, "ocr candidate");
            let Some(found) = fuzzy_match(&text, eligible) else {
                continue;
            };
            if found.confidence >= self.config.threshold {
                return Some(TextHit {
                    found,
                    center: center.offset(region.origin()),
                    text,
                });
            }
        }

        None
    }

    fn read(&self, ocr: &dyn OcrBackend, crop: Image) -> anyhow::Result<String> {
        use imageproc::contrast::{otsu_level, threshold, ThresholdType};

        let gray = crop.to_gray_image();
        let bin = threshold(&gray, otsu_level(&gray), ThresholdType::Binary);
        let prepared = OwnedImage::from_gray_as_rgb(&bin).resized_h(bin.height() * self.config.upscale.max(1))?;

        let parts = Layout::ALL
            .into_iter()
            .map(|layout| ocr.read(prepared.as_image(), layout))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        Ok(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    struct Fixed(&'static str);

    impl OcrBackend for Fixed {
        fn read(&self, _image: Image, layout: Layout) -> String {
            match layout {
                Layout::Block => self.0.to_string(),
                _ => String::new(),
            }
        }
    }

    fn sets() -> Vec<PhraseSet> {
        vec![
            PhraseSet::new(Label::PrimaryAction, &["العب بلوت", "play"], 0.9).with_variants(&["baloot"]),
            PhraseSet::new(Label::ConfirmReturnDelayed, &["عودة", "return"], 0.85)
                .with_tint(HsvBand::new([35, 80, 80], [85, 255, 255])),
            PhraseSet::new(Label::ConfirmReturnImmediate, &["عودة", "return"], 0.85),
            PhraseSet::new(Label::ExitAction, &["مغادرة", "leave"], 0.85),
        ]
    }

    #[test]
    fn cleaning_is_idempotent() {
        for raw in ["  PLAY!!  now\t", "عودة 123 :)", "İstanbul — Ok?", "", "مغادرة\n\nLEAVE"] {
            let once = clean_text(raw);
            assert_eq!(clean_text(&once), once, "input {raw:?}");
        }
        assert_eq!(clean_text("  PLAY!!  now\t"), "play now");
        assert_eq!(clean_text("عودة 123 :)"), "عودة");
    }

    #[test]
    fn full_match_scores_the_weight() {
        let m = fuzzy_match("[ Leave ]", &sets()).expect("match");
        assert_eq!(m.label, Label::ExitAction);
        assert_eq!(m.kind, MatchKind::Full);
        assert_eq!(m.confidence, 0.85);
    }

    #[test]
    fn partial_match_scores_seventy_percent() {
        let m = fuzzy_match("lea", &sets()).expect("match");
        assert_eq!(m.label, Label::ExitAction);
        assert_eq!(m.kind, MatchKind::Partial);
        assert!((m.confidence - 0.85 * 0.7).abs() < 1e-6);
    }

    #[test]
    fn full_match_beats_higher_priority_partial() {
        // "pla" is a partial for PrimaryAction, "leave" a full for ExitAction.
        let m = fuzzy_match("pla leave", &sets()).expect("match");
        assert_eq!(m.label, Label::ExitAction);
        assert_eq!(m.kind, MatchKind::Full);
    }

    #[test]
    fn priority_breaks_ties_regardless_of_set_order() {
        let mut reversed = sets();
        reversed.reverse();
        let m = fuzzy_match("play or leave", &reversed).expect("match");
        assert_eq!(m.label, Label::PrimaryAction);
    }

    #[test]
    fn noise_only_text_does_not_match() {
        assert!(fuzzy_match("12 ## 34", &sets()).is_none());
        assert!(fuzzy_match("zz", &sets()).is_none());
    }

    fn frame_with_button(color: image::Rgb<u8>) -> OwnedImage {
        let mut rgb = image::RgbImage::from_pixel(400, 300, image::Rgb([250, 250, 250]));
        draw_filled_rect_mut(&mut rgb, Rect::at(100, 100).of_size(160, 60), color);
        OwnedImage::from_rgb_image(&rgb)
    }

    #[test]
    fn candidates_cover_button_blobs() {
        let frame = frame_with_button(image::Rgb([30, 200, 30]));
        let recognizer = TextRecognizer::new(Box::new(Fixed("")), TextConfig::default());
        let found = recognizer.candidates(&frame.as_image().to_hsv());
        assert_eq!(found, vec![Candidate {
            bounds: Region::new(100, 100, 160, 60),
            crop: Region::new(80, 80, 200, 100),
        }]);
    }

    #[test]
    fn centre_ignores_padding_clamped_at_the_frame_edge() {
        let mut rgb = image::RgbImage::from_pixel(400, 300, image::Rgb([250, 250, 250]));
        draw_filled_rect_mut(&mut rgb, Rect::at(0, 100).of_size(160, 60), image::Rgb([120, 120, 120]));
        let frame = OwnedImage::from_rgb_image(&rgb);

        let recognizer = TextRecognizer::new(Box::new(Fixed("leave")), TextConfig::default());
        let found = recognizer.candidates(&frame.as_image().to_hsv());
        assert_eq!(found[0].crop, Region::new(0, 80, 180, 100));

        let hit = recognizer
            .recognize(frame.as_image(), &frame.as_image().to_hsv(), &sets())
            .expect("hit");
        assert_eq!(hit.center, Point::new(80, 130));
    }

    #[test]
    fn tint_routes_return_to_delayed_or_immediate() {
        let recognizer = TextRecognizer::new(Box::new(Fixed("عودة")), TextConfig::default());

        let green = frame_with_button(image::Rgb([30, 200, 30]));
        let hit = recognizer
            .recognize(green.as_image(), &green.as_image().to_hsv(), &sets())
            .expect("green hit");
        assert_eq!(hit.found.label, Label::ConfirmReturnDelayed);
        assert_eq!(hit.center, Point::new(180, 130));

        let gray = frame_with_button(image::Rgb([120, 120, 120]));
        let hit = recognizer
            .recognize(gray.as_image(), &gray.as_image().to_hsv(), &sets())
            .expect("gray hit");
        assert_eq!(hit.found.label, Label::ConfirmReturnImmediate);
    }

    #[test]
    fn centre_is_reported_in_frame_coordinates() {
        let frame = frame_with_button(image::Rgb([120, 120, 120]));
        let view = frame.as_image().sub_image(50, 40, 300, 200);
        let recognizer = TextRecognizer::new(Box::new(Fixed("leave")), TextConfig::default());
        let hit = recognizer.recognize(view, &view.to_hsv(), &sets()).expect("hit");
        assert_eq!(hit.found.label, Label::ExitAction);
        assert_eq!(hit.center, Point::new(180, 130));
    }

    #[test]
    fn unavailable_recognizer_never_finds() {
        let frame = frame_with_button(image::Rgb([120, 120, 120]));
        let recognizer = TextRecognizer::unavailable("models missing", TextConfig::default());
        assert!(!recognizer.is_available());
        assert!(recognizer.degraded().is_some());
        assert!(recognizer
            .recognize(frame.as_image(), &frame.as_image().to_hsv(), &sets())
            .is_none());
    }
}
