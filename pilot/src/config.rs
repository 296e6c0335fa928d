//! Persistent configuration.
//!
//! Stored as JSON in a platform-appropriate config directory unless a path is
//! given on the command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ie::{FusionConfig, Label, PathConfig, PhraseSet, ShapeSpec, TemplateEntry};
use serde::{Deserialize, Serialize};

use crate::controller::Policy;

/// On-disk configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Target window application name (from `xcap::Window::app_name()`).
	///
	/// If multiple windows share the same app name, the first match is used.
	pub app_name: String,

	/// Optional max capture height (downscales large captures for performance).
	pub max_capture_height: Option<u32>,

	/// Folder containing `ocr/`; discovered automatically when unset.
	pub assets_dir: Option<PathBuf>,

	/// Prefix of the OCR recognition model and charset files.
	pub ocr_language: String,

	/// Folder the template file names are relative to.
	pub template_dir: PathBuf,
	pub templates: Vec<TemplateEntry>,
	pub phrases: Vec<PhraseSet>,
	pub shapes: Vec<ShapeSpec>,
	pub fusion: FusionConfig,
	/// Trail to drag along on otherwise idle screens; off when unset.
	pub gesture: Option<PathConfig>,
	pub timing: Timing,
	pub debug: DebugConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			app_name: "Jawaker".to_string(),
			max_capture_height: Some(1080),
			assets_dir: None,
			ocr_language: "arabic".to_string(),
			template_dir: PathBuf::from("templates"),
			templates: default_templates(),
			phrases: ie::fusion::default_phrases(),
			shapes: ie::fusion::default_shapes(),
			fusion: FusionConfig::default(),
			gesture: None,
			timing: Timing::default(),
			debug: DebugConfig::default(),
		}
	}
}

fn default_templates() -> Vec<TemplateEntry> {
	[
		(Label::PrimaryAction, "play_baloot_template.png"),
		(Label::ConfirmReturnDelayed, "return_template.png"),
		(Label::ConfirmReturnImmediate, "return_grey_template.png"),
		(Label::ExitAction, "leave_game_template.png"),
		(Label::SecondaryReward, "claim_button_template.png"),
		(Label::Acknowledge, "mouwafeq_template.png"),
	]
	.into_iter()
	.map(|(label, file)| TemplateEntry {
		label,
		files: vec![PathBuf::from(file)],
	})
	.collect()
}

/// Controller timing, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
	pub cycle_pause_s: f32,
	pub idle_pause_s: f32,
	pub stuck_threshold: u32,
	pub stuck_pause_s: f32,
	pub failure_ceiling: u32,
	pub failure_cooldown_s: f32,
	pub error_pause_s: f32,
	pub delayed_wait_s: f32,
	pub delayed_step_s: f32,
	pub delayed_settle_s: f32,
	pub reward_cooldown_s: f32,
	pub reward_suppressed_pause_s: f32,
	pub primary_settle_s: f32,
	pub return_settle_s: f32,
	pub exit_settle_s: f32,
	pub reward_settle_s: f32,
	pub acknowledge_settle_s: f32,
	pub drag_settle_s: f32,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			cycle_pause_s: 1.0,
			idle_pause_s: 3.0,
			stuck_threshold: 10,
			stuck_pause_s: 10.0,
			failure_ceiling: 5,
			failure_cooldown_s: 30.0,
			error_pause_s: 5.0,
			delayed_wait_s: 40.0,
			delayed_step_s: 5.0,
			delayed_settle_s: 3.0,
			reward_cooldown_s: 10.0,
			reward_suppressed_pause_s: 3.0,
			primary_settle_s: 4.0,
			return_settle_s: 3.0,
			exit_settle_s: 4.0,
			reward_settle_s: 1.0,
			acknowledge_settle_s: 1.0,
			drag_settle_s: 1.5,
		}
	}
}

/// Negative or non-finite values become zero.
fn secs(v: f32) -> Duration {
	Duration::try_from_secs_f32(v.max(0.0)).unwrap_or(Duration::ZERO)
}

impl Timing {
	pub fn policy(&self) -> Policy {
		Policy {
			cycle_pause: secs(self.cycle_pause_s),
			idle_pause: secs(self.idle_pause_s),
			stuck_threshold: self.stuck_threshold,
			stuck_pause: secs(self.stuck_pause_s),
			failure_ceiling: self.failure_ceiling.max(1),
			failure_cooldown: secs(self.failure_cooldown_s),
			error_pause: secs(self.error_pause_s),
			delayed_wait: secs(self.delayed_wait_s),
			delayed_step: secs(self.delayed_step_s),
			delayed_settle: secs(self.delayed_settle_s),
			reward_cooldown: secs(self.reward_cooldown_s),
			reward_suppressed_pause: secs(self.reward_suppressed_pause_s),
			primary_settle: secs(self.primary_settle_s),
			return_settle: secs(self.return_settle_s),
			exit_settle: secs(self.exit_settle_s),
			reward_settle: secs(self.reward_settle_s),
			acknowledge_settle: secs(self.acknowledge_settle_s),
			drag_settle: secs(self.drag_settle_s),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
	/// Save stuck/error/manual frames as PNG.
	pub snapshots: bool,
	pub dir: PathBuf,
}

impl Default for DebugConfig {
	fn default() -> Self {
		Self {
			snapshots: true,
			dir: PathBuf::from("debug_screenshots"),
		}
	}
}

impl Config {
	/// Default path to the config file.
	pub fn path() -> Result<PathBuf> {
		let base = dirs::config_dir().context("config_dir() unavailable")?;
		Ok(base.join("pilot.json"))
	}

	/// Load configuration, falling back to defaults on any error.
	pub fn load_or_default(path: &Path) -> Self {
		match Self::try_load(path) {
			Ok(cfg) => cfg,
			Err(err) => {
				tracing::warn!(error = %err, "failed to load config; using defaults");
				Self::default()
			}
		}
	}

	/// Load configuration; a missing file yields the defaults.
	pub fn try_load(path: &Path) -> Result<Self> {
		if !path.exists() {
			return Ok(Self::default());
		}
		let json = fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
		let cfg = serde_json::from_str(&json).with_context(|| format!("parse {:?}", path))?;
		Ok(cfg)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
		}
		let json = serde_json::to_string_pretty(self).context("serialize config")?;
		fs::write(path, json).with_context(|| format!("write {:?}", path))?;
		Ok(())
	}
}
