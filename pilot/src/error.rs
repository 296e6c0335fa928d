/// Why no frame could be produced this cycle.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
	#[error("no window with app name {0:?}")]
	WindowNotFound(String),

	#[error("capture backend failed: {0}")]
	Backend(String),

	#[error("captured frame is empty")]
	Empty,
}

/// Why a click could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum ActuationError {
	#[error("input backend unavailable: {0}")]
	Init(String),

	#[error("pointer dispatch failed: {0}")]
	Dispatch(String),
}
