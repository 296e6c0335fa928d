//! Fetches the PaddleOCR model files the text recognizer needs.
//!
//! Usage: `model_downloader [OUT_DIR] [LANG]` (defaults: `ocr`, `arabic`).
//! The source can be overridden with `PILOT_MODEL_URL`.

use std::{
	fs::File,
	io::{BufWriter, Write},
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};

const DEFAULT_BASE_URL: &str = "https://github.com/zibo-chen/rust-paddle-ocr/raw/main/models";

fn main() -> Result<()> {
	let mut args = std::env::args().skip(1);
	let out = PathBuf::from(args.next().unwrap_or_else(|| "ocr".to_string()));
	let lang = args.next().unwrap_or_else(|| "arabic".to_string());
	let base = std::env::var("PILOT_MODEL_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

	std::fs::create_dir_all(&out).with_context(|| format!("Create {}", out.display()))?;

	let files = [
		("PP-OCRv5_mobile_det.mnn".to_string(), "detection.mnn".to_string()),
		(format!("{lang}_PP-OCRv5_mobile_rec_infer.mnn"), format!("{lang}_recognition.mnn")),
		(format!("ppocr_keys_{lang}.txt"), format!("{lang}_charset.txt")),
	];

	for (remote, local) in files {
		let target = out.join(&local);
		if target.is_file() {
			println!("{} already present", target.display());
			continue;
		}
		let url = format!("{base}/{remote}");
		download(&url, &target)?;
		println!("{url} -> {}", target.display());
	}

	Ok(())
}

fn download(url: &str, target: &Path) -> Result<()> {
	let mut reader = ureq::get(url)
		.call()
		.with_context(|| format!("GET {url}"))?
		.into_reader();

	// Write to a temp file first so an interrupted download never looks complete.
	let tmp = target.with_extension("part");
	let file = File::create(&tmp).with_context(|| format!("Create {}", tmp.display()))?;
	let mut writer = BufWriter::new(file);
	std::io::copy(&mut reader, &mut writer).with_context(|| format!("Download {url}"))?;
	writer.flush().context("Flush download")?;
	drop(writer);

	std::fs::rename(&tmp, target).with_context(|| format!("Persist {}", target.display()))?;
	Ok(())
}
