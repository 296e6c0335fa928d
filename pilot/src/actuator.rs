use std::time::Duration;

use crate::capture::{SharedViewport, Viewport};
use crate::error::ActuationError;

/// Pointer moves between press and release of a drag.
const DRAG_STEPS: i32 = 12;
const DRAG_STEP_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
	/// Left click at the action point.
	Click,
	/// Press at the action point, move to `to`, release.
	Drag { to: ie::Point },
}

/// Delivers pointer actions at frame coordinates.
pub trait Actuator {
	fn dispatch_action(&mut self, at: ie::Point, kind: ActionKind) -> Result<(), ActuationError>;
}

/// Real pointer input through `enigo`.
pub struct EnigoActuator {
	enigo: enigo::Enigo,
	viewport: SharedViewport,
}

impl EnigoActuator {
	pub fn new(viewport: SharedViewport) -> Result<Self, ActuationError> {
		let enigo = enigo::Enigo::new(&enigo::Settings::default()).map_err(|e| ActuationError::Init(e.to_string()))?;
		Ok(Self { enigo, viewport })
	}

	fn move_to(&mut self, (x, y): (i32, i32)) -> Result<(), ActuationError> {
		use enigo::Mouse;

		self.enigo
			.move_mouse(x, y, enigo::Coordinate::Abs)
			.map_err(|e| ActuationError::Dispatch(e.to_string()))
	}

	fn left(&mut self, direction: enigo::Direction) -> Result<(), ActuationError> {
		use enigo::Mouse;

		self.enigo
			.button(enigo::Button::Left, direction)
			.map_err(|e| ActuationError::Dispatch(e.to_string()))
	}
}

impl Actuator for EnigoActuator {
	fn dispatch_action(&mut self, at: ie::Point, kind: ActionKind) -> Result<(), ActuationError> {
		let viewport = self.viewport.lock().map(|v| *v).unwrap_or_default();
		let from = viewport.to_screen(at);

		match kind {
			ActionKind::Click => {
				tracing::debug!(frame = %at, x = from.0, y = from.1, "click");
				self.move_to(from)?;
				self.left(enigo::Direction::Click)
			}
			ActionKind::Drag { to } => {
				let to = viewport.to_screen(to);
				tracing::debug!(frame = %at, ?from, ?to, "drag");
				self.move_to(from)?;
				self.left(enigo::Direction::Press)?;

				let moved = (1..=DRAG_STEPS).try_for_each(|i| {
					std::thread::sleep(DRAG_STEP_DELAY);
					self.move_to(lerp(from, to, i, DRAG_STEPS))
				});
				// Release even if a move failed, so the button is never left held.
				let released = self.left(enigo::Direction::Release);
				moved.and(released)
			}
		}
	}
}

fn lerp(from: (i32, i32), to: (i32, i32), step: i32, steps: i32) -> (i32, i32) {
	(
		from.0 + (to.0 - from.0) * step / steps,
		from.1 + (to.1 - from.1) * step / steps,
	)
}

/// Logs actions without touching the pointer.
#[derive(Debug, Default)]
pub struct DryRunActuator {
	viewport: SharedViewport,
}

impl DryRunActuator {
	pub fn new(viewport: SharedViewport) -> Self {
		Self { viewport }
	}
}

impl Actuator for DryRunActuator {
	fn dispatch_action(&mut self, at: ie::Point, kind: ActionKind) -> Result<(), ActuationError> {
		let viewport: Viewport = self.viewport.lock().map(|v| *v).unwrap_or_default();
		let (x, y) = viewport.to_screen(at);
		match kind {
			ActionKind::Click => tracing::info!(frame = %at, x, y, "dry run: click suppressed"),
			ActionKind::Drag { to } => {
				let to = viewport.to_screen(to);
				tracing::info!(frame = %at, x, y, ?to, "dry run: drag suppressed");
			}
		}
		Ok(())
	}
}
