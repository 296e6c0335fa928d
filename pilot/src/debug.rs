//! Debug snapshots, written to disk on a background thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;

/// Receives frames worth keeping for later inspection.
pub trait SnapshotSink {
	/// Fire-and-forget; must never block the control loop on disk I/O.
	fn submit(&self, tag: &str, frame: &ie::OwnedImage);
}

/// Discards every snapshot.
#[derive(Debug, Default)]
pub struct NoSnapshots;

impl SnapshotSink for NoSnapshots {
	fn submit(&self, tag: &str, _frame: &ie::OwnedImage) {
		tracing::trace!(tag, "snapshot skipped (disabled)");
	}
}

/// Hands snapshots to a writer thread that saves them as PNG.
pub struct SnapshotWriter {
	tx: Sender<(String, ie::OwnedImage)>,
}

impl SnapshotWriter {
	pub fn spawn(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;

		let (tx, rx) = mpsc::channel::<(String, ie::OwnedImage)>();
		std::thread::Builder::new()
			.name("snapshots".to_string())
			.spawn(move || {
				for (tag, frame) in rx {
					let path = snapshot_path(&dir, &tag);
					match frame.as_image().save_png(&path) {
						Ok(()) => tracing::info!(path = %path.display(), "saved snapshot"),
						Err(err) => tracing::warn!(error = %err, path = %path.display(), "failed to save snapshot"),
					}
				}
			})
			.context("spawn snapshot writer")?;

		Ok(Self { tx })
	}
}

impl SnapshotSink for SnapshotWriter {
	fn submit(&self, tag: &str, frame: &ie::OwnedImage) {
		if self.tx.send((tag.to_string(), frame.clone())).is_err() {
			tracing::warn!(tag, "snapshot writer has stopped");
		}
	}
}

fn snapshot_path(dir: &Path, tag: &str) -> PathBuf {
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0);
	let tag = tag
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
		.collect::<String>();
	dir.join(format!("{millis}_{tag}.png"))
}
