use std::path::PathBuf;

use crate::Label;

/// A catalogue entry that cannot be used. Only raised while building the
/// catalogue at startup; detection itself never returns errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
	#[error("template for {label} not found: {path}")]
	MissingTemplate { label: Label, path: PathBuf },

	#[error("template for {label} could not be decoded: {path}")]
	CorruptTemplate {
		label: Label,
		path: PathBuf,
		#[source]
		source: image::ImageError,
	},

	#[error("template for {label} has no pixels: {path}")]
	EmptyTemplate { label: Label, path: PathBuf },

	#[error("catalogue entry for {0} lists no files or phrases")]
	EmptyEntry(Label),

	#[error("{0} is a sentinel and cannot be part of the catalogue")]
	SentinelLabel(Label),
}

/// A detector running with reduced capability. Informational: the engine keeps
/// working and the affected detector simply reports "not found".
#[derive(Debug, Clone, thiserror::Error)]
#[error("{detector} unavailable: {reason}")]
pub struct DetectionDegraded {
	pub detector: &'static str,
	pub reason: String,
}
