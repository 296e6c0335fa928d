//! Operator commands and the bounded channel that carries them to the controller.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

pub const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	Start,
	Stop,
	/// Stop the session and shut the controller down.
	EmergencyStop,
	/// Save the next frame for inspection.
	Screenshot,
	/// Operator input has ended. The running session (if any) finishes
	/// normally, then the controller shuts down.
	InputClosed,
}

impl Command {
	pub fn parse(line: &str) -> Option<Self> {
		match line.trim().to_ascii_lowercase().as_str() {
			"start" => Some(Self::Start),
			"stop" => Some(Self::Stop),
			"estop" | "emergency" | "quit" | "exit" => Some(Self::EmergencyStop),
			"shot" | "screenshot" => Some(Self::Screenshot),
			_ => None,
		}
	}
}

pub fn channel() -> (SyncSender<Command>, Receiver<Command>) {
	mpsc::sync_channel(CHANNEL_CAPACITY)
}

/// Non-blocking send. Returns `false` once the controller is gone.
pub fn forward(tx: &SyncSender<Command>, command: Command) -> bool {
	match tx.try_send(command) {
		Ok(()) => true,
		Err(TrySendError::Full(command)) => {
			tracing::warn!(?command, "command queue full; dropping");
			true
		}
		Err(TrySendError::Disconnected(_)) => false,
	}
}

/// Forward commands read line by line until EOF, an emergency stop, or the
/// controller going away. Reaching the end of the input is itself forwarded
/// as [`Command::InputClosed`].
pub fn read_commands(input: impl BufRead, tx: &SyncSender<Command>) {
	for line in input.lines() {
		let line = match line {
			Ok(line) => line,
			Err(err) => {
				tracing::warn!(error = %err, "failed to read command");
				break;
			}
		};
		if line.trim().is_empty() {
			continue;
		}

		let Some(command) = Command::parse(&line) else {
			tracing::warn!(input = %line.trim(), "unknown command (try start, stop, estop, shot, quit)");
			continue;
		};
		tracing::info!(?command, "command");
		if !forward(tx, command) || command == Command::EmergencyStop {
			return;
		}
	}

	// Blocking: unlike operator commands this one must not be dropped.
	if tx.send(Command::InputClosed).is_err() {
		tracing::debug!("controller already gone");
	}
}
