//! The fixed signal catalogue and the per-cycle fused result.

use serde::{Deserialize, Serialize};

use crate::Point;

/// A classified, actionable interface state.
///
/// The actionable variants are declared in fusion priority order; `Idle` and
/// `Error` are sentinels that no detector ever matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Label {
	/// Main-menu "play" button.
	PrimaryAction,
	/// Green return button; must be left alone for a while before clicking.
	ConfirmReturnDelayed,
	/// Gray return button; safe to click right away.
	ConfirmReturnImmediate,
	/// "Leave game" at the end of a round.
	ExitAction,
	/// Gift / reward "claim" button.
	SecondaryReward,
	/// "OK" / agree confirmation dialog.
	Acknowledge,
	Idle,
	Error,
}

impl Label {
	/// Actionable labels, highest priority first.
	pub const PRIORITY: [Label; 6] = [
		Label::PrimaryAction,
		Label::ConfirmReturnDelayed,
		Label::ConfirmReturnImmediate,
		Label::ExitAction,
		Label::SecondaryReward,
		Label::Acknowledge,
	];

	/// Position in [`Label::PRIORITY`]; sentinels sort last.
	pub fn rank(self) -> usize {
		Self::PRIORITY
			.iter()
			.position(|l| *l == self)
			.unwrap_or(Self::PRIORITY.len())
	}

	pub fn is_actionable(self) -> bool {
		!matches!(self, Label::Idle | Label::Error)
	}

	pub fn name(self) -> &'static str {
		match self {
			Label::PrimaryAction => "primary_action",
			Label::ConfirmReturnDelayed => "confirm_return_delayed",
			Label::ConfirmReturnImmediate => "confirm_return_immediate",
			Label::ExitAction => "exit_action",
			Label::SecondaryReward => "secondary_reward",
			Label::Acknowledge => "acknowledge",
			Label::Idle => "idle",
			Label::Error => "error",
		}
	}
}

impl std::fmt::Display for Label {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

/// Which detector produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
	Template,
	Text,
	Shape,
	None,
}

/// The fused perception result for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
	label: Label,
	confidence: f32,
	center: Option<Point>,
	method: Method,
	reason: String,
}

impl Detection {
	/// A positive detection. Confidence is clamped into `[0, 1]`.
	pub fn found(label: Label, confidence: f32, center: Point, method: Method, reason: impl Into<String>) -> Self {
		Self {
			label,
			confidence: clamp_unit(confidence),
			center: Some(center),
			method,
			reason: reason.into(),
		}
	}

	/// Nothing qualified this cycle.
	pub fn idle() -> Self {
		Self {
			label: Label::Idle,
			confidence: 0.0,
			center: None,
			method: Method::None,
			reason: "no buttons detected".to_string(),
		}
	}

	/// The cycle could not be perceived (capture failed, etc).
	pub fn error(reason: impl Into<String>) -> Self {
		Self {
			label: Label::Error,
			confidence: 0.0,
			center: None,
			method: Method::None,
			reason: reason.into(),
		}
	}

	pub fn label(&self) -> Label {
		self.label
	}

	pub fn confidence(&self) -> f32 {
		self.confidence
	}

	pub fn center(&self) -> Option<Point> {
		self.center
	}

	pub fn method(&self) -> Method {
		self.method
	}

	pub fn reason(&self) -> &str {
		&self.reason
	}
}

pub(crate) fn clamp_unit(v: f32) -> f32 {
	if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
