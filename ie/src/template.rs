//! Labeled reference images.

use std::path::{Path, PathBuf};

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, Label};

/// One or more grayscale reference images for a label.
#[derive(Debug, Clone)]
pub struct Template {
	pub label: Label,
	pub images: Vec<GrayImage>,
}

impl Template {
	pub fn new(label: Label, image: GrayImage) -> Self {
		Self { label, images: vec![image] }
	}

	pub fn with_image(mut self, image: GrayImage) -> Self {
		self.images.push(image);
		self
	}

	/// Native `(width, height)` of each reference image.
	pub fn dimensions(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
		self.images.iter().map(|i| i.dimensions())
	}
}

/// Which files make up a label's template, relative to the template directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateEntry {
	pub label: Label,
	pub files: Vec<PathBuf>,
}

/// The template catalogue. Immutable after load; at most one template per label.
#[derive(Debug, Clone, Default)]
pub struct TemplateBank {
	templates: Vec<Template>,
}

impl TemplateBank {
	/// Build from already decoded templates. Images of a repeated label are merged.
	pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
		let mut bank = Self::default();
		for t in templates {
			bank.insert(t);
		}
		bank
	}

	/// Load every configured file as grayscale. Any missing or undecodable
	/// entry fails the whole load.
	pub fn load(dir: impl AsRef<Path>, entries: &[TemplateEntry]) -> Result<Self, ConfigurationError> {
		let dir = dir.as_ref();
		let mut bank = Self::default();

		for entry in entries {
			if !entry.label.is_actionable() {
				return Err(ConfigurationError::SentinelLabel(entry.label));
			}
			if entry.files.is_empty() {
				return Err(ConfigurationError::EmptyEntry(entry.label));
			}

			for file in &entry.files {
				let path = dir.join(file);
				let image = load_grayscale(entry.label, &path)?;
				tracing::info!(label = %entry.label, path = %path.display(), width = image.width(), height = image.height(), "loaded template");
				bank.insert(Template::new(entry.label, image));
			}
		}

		Ok(bank)
	}

	fn insert(&mut self, template: Template) {
		match self.templates.iter_mut().find(|t| t.label == template.label) {
			Some(existing) => existing.images.extend(template.images),
			None => self.templates.push(template),
		}
	}

	pub fn get(&self, label: Label) -> Option<&Template> {
		self.templates.iter().find(|t| t.label == label)
	}

	pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
		self.templates.iter().map(|t| t.label)
	}

	pub fn len(&self) -> usize {
		self.templates.len()
	}

	pub fn is_empty(&self) -> bool {
		self.templates.is_empty()
	}
}

fn load_grayscale(label: Label, path: &Path) -> Result<GrayImage, ConfigurationError> {
	if !path.is_file() {
		return Err(ConfigurationError::MissingTemplate {
			label,
			path: path.to_path_buf(),
		});
	}

	let image = image::open(path)
		.map_err(|source| ConfigurationError::CorruptTemplate {
			label,
			path: path.to_path_buf(),
			source,
		})?
		.to_luma8();

	if image.width() == 0 || image.height() == 0 {
		return Err(ConfigurationError::EmptyTemplate {
			label,
			path: path.to_path_buf(),
		});
	}

	Ok(image)
}
