use serde::{Deserialize, Serialize};

/// A location in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Point {
	pub x: u32,
	pub y: u32,
}

impl Point {
	pub const fn new(x: u32, y: u32) -> Self {
		Self { x, y }
	}

	/// Translate a view-relative point by the view origin.
	pub fn offset(self, (dx, dy): (u32, u32)) -> Self {
		Self::new(self.x + dx, self.y + dy)
	}
}

impl std::fmt::Display for Point {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "({}, {})", self.x, self.y)
	}
}

/// Axis-aligned rectangle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Region {
	pub x: u32,
	pub y: u32,
	pub width: u32,
	pub height: u32,
}

impl Region {
	pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
		Self { x, y, width, height }
	}

	pub fn right(&self) -> u32 {
		self.x + self.width
	}

	pub fn bottom(&self) -> u32 {
		self.y + self.height
	}

	pub fn center(&self) -> Point {
		Point::new(self.x + self.width / 2, self.y + self.height / 2)
	}

	/// Grow by `pad` on every side, clamped to a `bound_w` x `bound_h` canvas.
	pub fn padded(&self, pad: u32, bound_w: u32, bound_h: u32) -> Self {
		let x1 = self.x.saturating_sub(pad);
		let y1 = self.y.saturating_sub(pad);
		let x2 = (self.right() + pad).min(bound_w);
		let y2 = (self.bottom() + pad).min(bound_h);
		Self::new(x1, y1, x2.saturating_sub(x1), y2.saturating_sub(y1))
	}
}
