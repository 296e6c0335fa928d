//! OCR wrapper.
//!
//! The production backend is `ocr-rs` (Rust PaddleOCR bindings). OCR engines are
//! sensitive to input quality, so the binarize/upscale preprocessing happens in
//! the text recognizer before calling into this module.

use std::path::Path;

use anyhow::Context;

use crate::Image;

/// How the text inside a crop is assumed to be laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// A single word, cropped tight to its ink.
    SingleWord,
    /// A uniform block of text; the crop is read as given.
    Block,
    /// A single line through the vertical middle of the crop.
    SingleLine,
}

impl Layout {
    /// The order layouts are tried in; outputs are concatenated in this order.
    pub const ALL: [Layout; 3] = [Layout::SingleWord, Layout::Block, Layout::SingleLine];
}

/// Anything that can turn pixels into text.
///
/// Implementations must not fail: an unreadable crop is an empty string.
pub trait OcrBackend: Send + Sync {
    fn read(&self, image: Image, layout: Layout) -> String;
}

pub struct PaddleOcr {
    engine: ocr_rs::OcrEngine,
}

impl PaddleOcr {
    /// Initialize the OCR engine with the given model paths.
    ///
    /// Fails when the model files are missing or invalid; callers treat that
    /// as a degraded (OCR-less) engine rather than a fatal error.
    pub fn try_new(
        detection: impl AsRef<Path>,
        recognition: impl AsRef<Path>,
        charsset: impl AsRef<Path>,
    ) -> anyhow::Result<Self> {
        let thread_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let engine = ocr_rs::OcrEngine::new(
            detection,
            recognition,
            charsset,
            Some(ocr_rs::OcrEngineConfig {
                backend: ocr_rs::Backend::CPU,
                thread_count: i32::try_from(thread_count).unwrap_or(i32::MAX),
                // Button captions are short and stylized; accuracy matters more
                // than throughput at one frame per second.
                precision_mode: ocr_rs::PrecisionMode::High,
                enable_parallel: thread_count > 1,
                min_result_confidence: 0.5,
                ..Default::default()
            }),
        )
        .context("failed to initialize OCR engine")?;

        Ok(Self { engine })
    }
}

impl OcrBackend for PaddleOcr {
    fn read(&self, image: Image, layout: Layout) -> String {
        let image = match layout {
            Layout::Block => image,
            Layout::SingleLine => {
                let band = (image.height() * 3 / 5).max(1);
                image.sub_image(0, (image.height() - band) / 2, image.width(), band)
            }
            Layout::SingleWord => ink_bounds(image)
                .map(|(x, y, w, h)| image.sub_image(x, y, w, h))
                .unwrap_or(image),
        };
        if image.width() == 0 || image.height() == 0 {
            return String::new();
        }

        let input = ocr_rs::preprocess::rgb_to_image(&image.get_bytes(), image.width(), image.height());

        match self.engine.recognize(&input) {
            Ok(results) => results
                .into_iter()
                .map(|v| v.text)
                .collect::<Vec<_>>()
                .join(" "),
            Err(err) => {
                tracing::debug!(error = %err, ?layout, "ocr pass failed");
                String::new()
            }
        }
    }
}

/// Bounding box of dark pixels (text is rendered dark on light), padded by a
/// few pixels so glyph edges survive.
fn ink_bounds(image: Image) -> Option<(u32, u32, u32, u32)> {
    const PAD: u32 = 4;
    let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0, 0);
    for y in 0..image.height() {
        for x in 0..image.width() {
            let dark = image.pixel_at(x, y).is_some_and(|c| c.luma() < 128);
            if dark {
                x1 = x1.min(x);
                y1 = y1.min(y);
                x2 = x2.max(x);
                y2 = y2.max(y);
            }
        }
    }
    if x1 > x2 || y1 > y2 {
        return None;
    }
    let x = x1.saturating_sub(PAD);
    let y = y1.saturating_sub(PAD);
    Some((x, y, x2 + 1 + PAD - x, y2 + 1 + PAD - y))
}
