use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

/// Environment variable overriding asset discovery.
pub const ASSETS_ENV: &str = "PILOT_ASSETS_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrAssets {
	pub detection: PathBuf,
	pub recognition: PathBuf,
	pub charset: PathBuf,
}

/// Accept either a folder containing `ocr/` or the `ocr/` folder itself.
fn ocr_dir(base: &Path) -> PathBuf {
	if base.join("detection.mnn").is_file() {
		base.to_path_buf()
	} else {
		base.join("ocr")
	}
}

/// Folders searched for assets, most specific first.
pub fn search_paths(configured: Option<&Path>) -> Vec<PathBuf> {
	let mut candidates = Vec::new();
	if let Some(dir) = configured {
		candidates.push(dir.to_path_buf());
	}
	if let Some(dir) = std::env::var_os(ASSETS_ENV) {
		candidates.push(PathBuf::from(dir));
	}
	if let Ok(exe) = std::env::current_exe()
		&& let Some(dir) = exe.parent()
	{
		candidates.push(dir.to_path_buf());
	}
	if let Ok(cwd) = std::env::current_dir() {
		candidates.push(cwd);
	}
	candidates
}

/// Locate the OCR model files for `language`.
pub fn resolve_ocr_assets(language: &str, candidates: &[PathBuf]) -> Result<OcrAssets> {
	let recognition_name = format!("{language}_recognition.mnn");
	let charset_name = format!("{language}_charset.txt");

	let mut tried = Vec::new();
	for base in candidates {
		let dir = ocr_dir(base);
		let detection = dir.join("detection.mnn");
		let recognition = dir.join(&recognition_name);
		let charset = dir.join(&charset_name);

		if detection.is_file() && recognition.is_file() && charset.is_file() {
			return Ok(OcrAssets { detection, recognition, charset });
		}
		tried.push(dir);
	}

	bail!(
		"OCR model files not found (ocr/detection.mnn, ocr/{recognition_name}, ocr/{charset_name}). Searched:\n{}\nRun `model_downloader` or set {ASSETS_ENV}.",
		tried
			.into_iter()
			.map(|p| format!("  - {}", p.display()))
			.collect::<Vec<_>>()
			.join("\n")
	)
}

/// Resolve a template folder: absolute paths are used as is, relative ones
/// are looked up in each candidate folder and finally taken relative to the
/// working directory.
pub fn resolve_dir(dir: &Path, candidates: &[PathBuf]) -> PathBuf {
	if dir.is_absolute() {
		return dir.to_path_buf();
	}
	candidates
		.iter()
		.map(|base| base.join(dir))
		.find(|p| p.is_dir())
		.unwrap_or_else(|| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scratch(name: &str) -> PathBuf {
		let dir = std::env::temp_dir().join(format!("pilot-assets-{name}-{}", std::process::id()));
		std::fs::create_dir_all(dir.join("ocr")).expect("mkdir");
		dir
	}

	#[test]
	fn finds_models_under_ocr_folder() {
		let root = scratch("ok");
		for f in ["detection.mnn", "arabic_recognition.mnn", "arabic_charset.txt"] {
			std::fs::write(root.join("ocr").join(f), b"x").expect("write");
		}

		let empty = scratch("empty");
		let found = resolve_ocr_assets("arabic", &[empty, root.clone()]).expect("found");
		assert_eq!(found.detection, root.join("ocr").join("detection.mnn"));

		// Pointing straight at the ocr folder works too.
		let found = resolve_ocr_assets("arabic", &[root.join("ocr")]).expect("found");
		assert_eq!(found.charset, root.join("ocr").join("arabic_charset.txt"));
	}

	#[test]
	fn missing_models_list_searched_folders() {
		let empty = scratch("none");
		let err = resolve_ocr_assets("latin", &[empty.clone()]).unwrap_err().to_string();
		assert!(err.contains("latin_recognition.mnn"));
		assert!(err.contains(&empty.join("ocr").display().to_string()));
	}

	#[test]
	fn relative_template_dir_prefers_existing_candidate() {
		let root = scratch("templates");
		std::fs::create_dir_all(root.join("templates")).expect("mkdir");
		assert_eq!(resolve_dir(Path::new("templates"), &[root.clone()]), root.join("templates"));
		assert_eq!(resolve_dir(Path::new("nowhere"), &[root]), PathBuf::from("nowhere"));
	}
}
