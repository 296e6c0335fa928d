use std::sync::{Arc, Mutex};

use xcap::image::EncodableLayout;

use crate::error::CaptureError;

/// Produces the frame for one control cycle.
pub trait FrameSource: Send {
	fn capture_frame(&mut self) -> Result<ie::OwnedImage, CaptureError>;
}

/// Where the last captured frame sits on screen.
///
/// Frame coordinates map to screen coordinates as
/// `origin + frame_xy * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
	pub x: f32,
	pub y: f32,
	/// Screen units per frame pixel.
	pub scale: f32,
}

impl Default for Viewport {
	fn default() -> Self {
		Self { x: 0.0, y: 0.0, scale: 1.0 }
	}
}

impl Viewport {
	pub fn to_screen(&self, p: ie::Point) -> (i32, i32) {
		(
			(self.x + p.x as f32 * self.scale).round() as i32,
			(self.y + p.y as f32 * self.scale).round() as i32,
		)
	}
}

pub type SharedViewport = Arc<Mutex<Viewport>>;

fn find_window(app_name: &str) -> Result<xcap::Window, CaptureError> {
	let windows = xcap::Window::all().map_err(|e| CaptureError::Backend(e.to_string()))?;
	windows
		.into_iter()
		.find(|window| window.app_name().ok().as_deref() == Some(app_name))
		.ok_or_else(|| CaptureError::WindowNotFound(app_name.to_string()))
}

/// Captures the first window whose app name matches.
pub struct WindowCapture {
	app_name: String,
	max_height: Option<u32>,
	viewport: SharedViewport,
}

impl WindowCapture {
	pub fn new(app_name: impl Into<String>, max_height: Option<u32>) -> Self {
		Self {
			app_name: app_name.into(),
			max_height,
			viewport: SharedViewport::default(),
		}
	}

	/// Updated on every successful capture; the actuator reads it to place clicks.
	pub fn viewport(&self) -> SharedViewport {
		self.viewport.clone()
	}
}

impl FrameSource for WindowCapture {
	fn capture_frame(&mut self) -> Result<ie::OwnedImage, CaptureError> {
		let window = find_window(&self.app_name)?;
		let img = window.capture_image().map_err(|e| CaptureError::Backend(e.to_string()))?;
		if img.width() == 0 || img.height() == 0 {
			return Err(CaptureError::Empty);
		}

		let mut frame = ie::OwnedImage::from_rgba(img.width() as usize, img.as_bytes());
		if let Some(max) = self.max_height
			&& frame.height() > max
		{
			frame
				.resize_h(max)
				.map_err(|e| CaptureError::Backend(format!("{e:#}")))?;
		}

		let window_width = window.width().map_err(|e| CaptureError::Backend(e.to_string()))?;
		let viewport = Viewport {
			x: window.x().map_err(|e| CaptureError::Backend(e.to_string()))? as f32,
			y: window.y().map_err(|e| CaptureError::Backend(e.to_string()))? as f32,
			scale: window_width as f32 / frame.width().max(1) as f32,
		};
		if let Ok(mut shared) = self.viewport.lock() {
			*shared = viewport;
		}

		tracing::trace!(width = frame.width(), height = frame.height(), ?viewport, "captured frame");
		Ok(frame)
	}
}
