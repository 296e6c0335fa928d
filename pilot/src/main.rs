//! Pilot: watches an application window and clicks through its recurring
//! screens.
//!
//! The controller runs on its own thread; this thread reads operator commands
//! from stdin.

mod actuator;
mod assets;
mod capture;
mod command;
mod config;
mod controller;
mod debug;
mod error;

use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use clap::Parser;

use crate::actuator::{Actuator, DryRunActuator, EnigoActuator};
use crate::capture::WindowCapture;
use crate::command::Command;
use crate::config::Config;
use crate::controller::{Controller, ControllerState};
use crate::debug::{NoSnapshots, SnapshotSink, SnapshotWriter};

#[derive(Parser, Debug)]
#[command(name = "pilot", version, about = "Screen-driven click automation")]
struct Cli {
	/// Config file (default: <config dir>/pilot.json)
	#[arg(long)]
	config: Option<PathBuf>,

	/// Log clicks instead of moving the pointer
	#[arg(long)]
	dry_run: bool,

	/// Start a session immediately instead of waiting for `start`
	#[arg(long)]
	autostart: bool,

	/// Write the default config to the config path and exit
	#[arg(long)]
	write_default: bool,
}

fn main() -> Result<()> {
	// Structured logging. Use `RUST_LOG=debug` etc.
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();
	let config_path = match cli.config {
		Some(path) => path,
		None => Config::path()?,
	};

	if cli.write_default {
		Config::default().save(&config_path)?;
		tracing::info!(path = %config_path.display(), "wrote default config");
		return Ok(());
	}

	let config = Config::load_or_default(&config_path);
	let engine = build_engine(&config)?;

	let (tx, rx) = command::channel();
	let (status_tx, status_rx) = mpsc::channel::<ControllerState>();
	std::thread::Builder::new()
		.name("status".to_string())
		.spawn(move || {
			for state in status_rx {
				tracing::debug!(
					phase = ?state.phase,
					label = %state.label,
					repetition = state.repetition,
					failures = state.failures,
					last_action = ?state.last_action.map(|(label, _)| label),
					running = state.running,
					"status"
				);
			}
		})
		.context("spawn status thread")?;

	// Input backends are not always `Send`, so everything pointer-related is
	// built on the controller thread itself.
	let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
	let dry_run = cli.dry_run;
	let controller_thread = std::thread::Builder::new()
		.name("controller".to_string())
		.spawn(move || {
			let capture = WindowCapture::new(config.app_name.clone(), config.max_capture_height);
			let viewport = capture.viewport();

			let actuator: Box<dyn Actuator> = if dry_run {
				Box::new(DryRunActuator::new(viewport))
			} else {
				match EnigoActuator::new(viewport) {
					Ok(actuator) => Box::new(actuator),
					Err(err) => {
						let _ = ready_tx.send(Err(err.to_string()));
						return;
					}
				}
			};

			let snapshots: Box<dyn SnapshotSink> = if config.debug.snapshots {
				match SnapshotWriter::spawn(&config.debug.dir) {
					Ok(writer) => Box::new(writer),
					Err(err) => {
						tracing::warn!(error = %err, "debug snapshots disabled");
						Box::new(NoSnapshots)
					}
				}
			} else {
				Box::new(NoSnapshots)
			};

			let mut controller = Controller::new(Box::new(engine), Box::new(capture), actuator, rx, config.timing.policy())
				.with_snapshots(snapshots)
				.with_status(status_tx)
				.with_gesture(config.gesture.clone());
			let _ = ready_tx.send(Ok(()));
			controller.serve();
		})
		.context("spawn controller thread")?;

	match ready_rx.recv() {
		Ok(Ok(())) => {}
		Ok(Err(err)) => anyhow::bail!("failed to initialize input: {err}"),
		Err(_) => anyhow::bail!("controller thread exited during startup"),
	}

	if cli.autostart {
		command::forward(&tx, Command::Start);
	}
	println!("commands: start | stop | estop | shot | quit");
	command::read_commands(std::io::stdin().lock(), &tx);
	tracing::info!("no more operator input; waiting for the controller to finish");

	// End of input was forwarded as `InputClosed`: a running session finishes
	// first, then the controller returns. `tx` stays alive so that session is
	// not cut short by a disconnected channel.
	controller_thread
		.join()
		.map_err(|_| anyhow::anyhow!("controller thread panicked"))?;
	drop(tx);
	Ok(())
}

fn build_engine(config: &Config) -> Result<ie::Engine> {
	let candidates = assets::search_paths(config.assets_dir.as_deref());

	let template_dir = assets::resolve_dir(&config.template_dir, &candidates);
	let templates = ie::TemplateBank::load(&template_dir, &config.templates)
		.with_context(|| format!("load templates from {}", template_dir.display()))?;
	let catalogue = ie::Catalogue::new(templates, config.phrases.clone(), config.shapes.clone())
		.context("invalid catalogue")?;

	let text_config = config.fusion.text.clone();
	let text = match assets::resolve_ocr_assets(&config.ocr_language, &candidates) {
		Ok(ocr) => ie::text_recognizer(ocr.detection, ocr.recognition, ocr.charset, text_config),
		Err(err) => ie::TextRecognizer::unavailable(format!("{err:#}"), text_config),
	};

	let engine = ie::Engine::new(Arc::new(catalogue), config.fusion.clone(), text);
	tracing::info!(
		templates = ?engine.catalogue().templates().labels().collect::<Vec<_>>(),
		phrases = engine.catalogue().phrases().len(),
		shapes = engine.catalogue().shapes().len(),
		degraded = engine.degraded().len(),
		"perception engine ready"
	);
	Ok(engine)
}
