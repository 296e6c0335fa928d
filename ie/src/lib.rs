//! Screen-state perception: classifies a captured frame into one actionable
//! [`Label`] by fusing template matching, OCR and colour/shape heuristics.

mod image;
pub use image::*;
mod region;
pub use region::*;
mod label;
pub use label::*;
mod error;
pub use error::*;
mod template;
pub use template::*;
mod matcher;
pub use matcher::*;
mod ocr;
pub use ocr::*;
pub mod contour;
pub mod text;
pub use text::{clean_text, fuzzy_match, PhraseMatch, PhraseSet, TextConfig, TextRecognizer};
pub mod shape;
pub use shape::{ShapeDetector, ShapeSpec};
pub mod path;
pub use path::{trace_path, DragPath, PathConfig};
pub mod fusion;
pub use fusion::{Catalogue, Engine, FusionConfig, FusionMode, Perception};

/// Build the text recognizer from OCR model files, falling back to a
/// recognizer without OCR when the models cannot be loaded.
pub fn text_recognizer(
	ocr_detection: impl AsRef<std::path::Path>,
	ocr_recognition: impl AsRef<std::path::Path>,
	ocr_charsset: impl AsRef<std::path::Path>,
	config: TextConfig,
) -> TextRecognizer {
	match PaddleOcr::try_new(ocr_detection, ocr_recognition, ocr_charsset) {
		Ok(ocr) => TextRecognizer::new(Box::new(ocr), config),
		Err(err) => TextRecognizer::unavailable(format!("{err:#}"), config),
	}
}
