//! The reactive control loop.
//!
//! One cycle: poll commands, capture, perceive, then react to the label with
//! a click, a wait, a drag, or a back-off. Cycles run strictly one at a time on the
//! controller thread; the only state shared with other threads is the command
//! channel and the optional status observer.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use ie::{Detection, DragPath, Label, PathConfig, Perception};

use crate::actuator::{ActionKind, Actuator};
use crate::capture::FrameSource;
use crate::command::Command;
use crate::debug::{NoSnapshots, SnapshotSink};

/// Source of time. Swapped for a fake in tests.
pub trait Clock {
	fn now(&self) -> Instant;
	fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}

	fn sleep(&self, duration: Duration) {
		std::thread::sleep(duration);
	}
}

/// Timing and escalation policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
	/// Pause between cycles while a session continues.
	pub cycle_pause: Duration,
	/// Pause after a cycle in which nothing was detected.
	pub idle_pause: Duration,
	/// Identical consecutive cycles tolerated before the screen counts as stuck.
	pub stuck_threshold: u32,
	pub stuck_pause: Duration,
	/// Consecutive failures that trigger the long cooldown (or end the session on errors).
	pub failure_ceiling: u32,
	pub failure_cooldown: Duration,
	pub error_pause: Duration,
	/// How long a delayed label is left alone before it is clicked.
	pub delayed_wait: Duration,
	/// Granularity of that wait; commands are polled after every step.
	pub delayed_step: Duration,
	pub delayed_settle: Duration,
	/// Minimum time between two reward clicks.
	pub reward_cooldown: Duration,
	/// Pause taken instead of a reward click suppressed by the cooldown.
	pub reward_suppressed_pause: Duration,
	pub primary_settle: Duration,
	pub return_settle: Duration,
	pub exit_settle: Duration,
	pub reward_settle: Duration,
	pub acknowledge_settle: Duration,
	pub drag_settle: Duration,
}

impl Default for Policy {
	fn default() -> Self {
		Self {
			cycle_pause: Duration::from_secs(1),
			idle_pause: Duration::from_secs(3),
			stuck_threshold: 10,
			stuck_pause: Duration::from_secs(10),
			failure_ceiling: 5,
			failure_cooldown: Duration::from_secs(30),
			error_pause: Duration::from_secs(5),
			delayed_wait: Duration::from_secs(40),
			delayed_step: Duration::from_secs(5),
			delayed_settle: Duration::from_secs(3),
			reward_cooldown: Duration::from_secs(10),
			reward_suppressed_pause: Duration::from_secs(3),
			primary_settle: Duration::from_secs(4),
			return_settle: Duration::from_secs(3),
			exit_settle: Duration::from_secs(4),
			reward_settle: Duration::from_secs(1),
			acknowledge_settle: Duration::from_secs(1),
			drag_settle: Duration::from_millis(1500),
		}
	}
}

impl Policy {
	/// Settle delay after an immediate click; `None` for labels that are not
	/// clicked immediately.
	pub fn settle(&self, label: Label) -> Option<Duration> {
		match label {
			Label::PrimaryAction => Some(self.primary_settle),
			Label::ConfirmReturnImmediate => Some(self.return_settle),
			Label::ExitAction => Some(self.exit_settle),
			Label::SecondaryReward => Some(self.reward_settle),
			Label::Acknowledge => Some(self.acknowledge_settle),
			Label::ConfirmReturnDelayed | Label::Idle | Label::Error => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Stopped,
	/// Nothing actionable on screen; pausing before looking again.
	Waiting,
	Running,
	Detecting,
	ActingImmediate,
	ActingDelayed,
	Error,
}

/// Snapshot of the controller, sent to the observer on every phase change.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
	pub phase: Phase,
	pub label: Label,
	pub repetition: u32,
	pub failures: u32,
	/// Label and time of the last click.
	pub last_action: Option<(Label, Instant)>,
	pub running: bool,
}

impl Default for ControllerState {
	fn default() -> Self {
		Self {
			phase: Phase::Stopped,
			label: Label::Idle,
			repetition: 0,
			failures: 0,
			last_action: None,
			running: false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Continue,
	Stop,
}

pub struct Controller {
	perception: Box<dyn Perception>,
	frames: Box<dyn FrameSource>,
	actuator: Box<dyn Actuator>,
	commands: Receiver<Command>,
	snapshots: Box<dyn SnapshotSink>,
	status: Option<Sender<ControllerState>>,
	clock: Box<dyn Clock>,
	policy: Policy,
	/// Zone searched for a trail to drag along when nothing is detected.
	gesture: Option<PathConfig>,

	state: ControllerState,
	previous_label: Option<Label>,
	last_reward: Option<Instant>,
	/// Set by an emergency stop or a vanished command channel.
	shutdown: bool,
	/// No more commands will arrive; shut down once stopped.
	input_closed: bool,
}

impl Controller {
	pub fn new(
		perception: Box<dyn Perception>,
		frames: Box<dyn FrameSource>,
		actuator: Box<dyn Actuator>,
		commands: Receiver<Command>,
		policy: Policy,
	) -> Self {
		Self {
			perception,
			frames,
			actuator,
			commands,
			snapshots: Box::new(NoSnapshots),
			status: None,
			clock: Box::new(SystemClock),
			policy,
			gesture: None,
			state: ControllerState::default(),
			previous_label: None,
			last_reward: None,
			shutdown: false,
			input_closed: false,
		}
	}

	pub fn with_snapshots(mut self, snapshots: Box<dyn SnapshotSink>) -> Self {
		self.snapshots = snapshots;
		self
	}

	pub fn with_status(mut self, status: Sender<ControllerState>) -> Self {
		self.status = Some(status);
		self
	}

	pub fn with_gesture(mut self, gesture: Option<PathConfig>) -> Self {
		self.gesture = gesture;
		self
	}

	pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn state(&self) -> &ControllerState {
		&self.state
	}

	/// Block on the command channel while stopped. Returns on an emergency
	/// stop, when every command sender is gone, or once stopped after operator
	/// input has closed.
	pub fn serve(&mut self) {
		tracing::info!("controller ready (waiting for start)");
		while !self.shutdown && !self.input_closed {
			match self.commands.recv() {
				Ok(Command::Start) => self.run_session(),
				Ok(Command::Stop) => tracing::debug!("already stopped"),
				Ok(Command::Screenshot) => self.manual_snapshot(),
				Ok(Command::InputClosed) => self.input_closed = true,
				Ok(Command::EmergencyStop) | Err(_) => self.shutdown = true,
			}
		}
		self.set_phase(Phase::Stopped);
		tracing::info!("controller shut down");
	}

	/// Run cycles until one decides to stop.
	pub fn run_session(&mut self) {
		self.state.running = true;
		self.state.repetition = 0;
		self.state.failures = 0;
		self.state.label = Label::Idle;
		self.previous_label = None;
		tracing::info!("session started");
		self.set_phase(Phase::Running);

		while self.run_cycle() == Decision::Continue {}

		tracing::info!("session ended");
	}

	pub fn run_cycle(&mut self) -> Decision {
		match self.commands.try_recv() {
			Ok(Command::Start) => tracing::debug!("already running"),
			Ok(Command::InputClosed) => self.close_input(),
			Ok(Command::Stop) => return self.halt("stop requested"),
			Ok(Command::EmergencyStop) => {
				self.shutdown = true;
				return self.halt("emergency stop");
			}
			Ok(Command::Screenshot) => {
				self.manual_snapshot();
				return Decision::Continue;
			}
			Err(TryRecvError::Empty) => {}
			Err(TryRecvError::Disconnected) => {
				self.shutdown = true;
				return self.halt("command channel closed");
			}
		}

		self.set_phase(Phase::Detecting);
		let (frame, detection) = match self.frames.capture_frame() {
			Ok(frame) => {
				let detection = self.perception.perceive(frame.as_image());
				(Some(frame), detection)
			}
			Err(err) => {
				tracing::warn!(error = %err, "capture failed");
				(None, Detection::error(err.to_string()))
			}
		};
		tracing::info!(
			label = %detection.label(),
			confidence = detection.confidence(),
			method = ?detection.method(),
			reason = detection.reason(),
			"detection"
		);

		self.track(detection.label());
		let decision = self.dispatch(&detection, frame.as_ref());
		if decision == Decision::Continue {
			self.clock.sleep(self.policy.cycle_pause);
		}
		decision
	}

	fn track(&mut self, label: Label) {
		if self.previous_label == Some(label) {
			self.state.repetition += 1;
		} else {
			self.state.repetition = 0;
		}
		self.previous_label = Some(label);
		self.state.label = label;
	}

	fn dispatch(&mut self, detection: &Detection, frame: Option<&ie::OwnedImage>) -> Decision {
		match detection.label() {
			label @ (Label::PrimaryAction
			| Label::ConfirmReturnImmediate
			| Label::ExitAction
			| Label::SecondaryReward
			| Label::Acknowledge) => self.act_immediately(label, detection, frame),
			Label::ConfirmReturnDelayed => self.act_delayed(detection, frame),
			Label::Idle => self.on_idle(frame),
			Label::Error => self.on_error(detection.reason(), frame),
		}
	}

	fn act_immediately(&mut self, label: Label, detection: &Detection, frame: Option<&ie::OwnedImage>) -> Decision {
		if label == Label::SecondaryReward
			&& let Some(at) = self.last_reward
			&& self.clock.now().saturating_duration_since(at) < self.policy.reward_cooldown
		{
			tracing::info!("reward clicked recently; skipping");
			self.set_phase(Phase::Waiting);
			self.clock.sleep(self.policy.reward_suppressed_pause);
			return Decision::Continue;
		}

		self.set_phase(Phase::ActingImmediate);
		if let Err(decision) = self.click(label, detection, frame) {
			return decision;
		}
		if label == Label::SecondaryReward {
			self.last_reward = Some(self.clock.now());
		}

		let settle = self.policy.settle(label).unwrap_or(self.policy.cycle_pause);
		self.clock.sleep(settle);
		self.set_phase(Phase::Running);
		Decision::Continue
	}

	fn act_delayed(&mut self, detection: &Detection, frame: Option<&ie::OwnedImage>) -> Decision {
		self.set_phase(Phase::ActingDelayed);

		let step = self.policy.delayed_step.max(Duration::from_millis(1));
		let mut remaining = self.policy.delayed_wait;
		while !remaining.is_zero() {
			let slice = remaining.min(step);
			self.clock.sleep(slice);
			remaining -= slice;
			tracing::info!(remaining_s = remaining.as_secs(), "waiting before return click");

			match self.commands.try_recv() {
				Ok(Command::Stop) => return self.halt("stop requested during wait"),
				Ok(Command::EmergencyStop) => {
					self.shutdown = true;
					return self.halt("emergency stop during wait");
				}
				Err(TryRecvError::Disconnected) => {
					self.shutdown = true;
					return self.halt("command channel closed");
				}
				Ok(Command::Screenshot) => {
					if let Some(frame) = frame {
						self.snapshots.submit("manual", frame);
					}
				}
				Ok(Command::InputClosed) => self.close_input(),
				Ok(Command::Start) | Err(TryRecvError::Empty) => {}
			}
		}

		if let Err(decision) = self.click(Label::ConfirmReturnDelayed, detection, frame) {
			return decision;
		}
		self.clock.sleep(self.policy.delayed_settle);
		self.set_phase(Phase::Running);
		Decision::Continue
	}

	/// Click the detection centre. A failed click is handled as an error
	/// cycle; its decision is returned as `Err`.
	fn click(&mut self, label: Label, detection: &Detection, frame: Option<&ie::OwnedImage>) -> Result<(), Decision> {
		let Some(center) = detection.center() else {
			return Err(self.on_error("detection without a centre", frame));
		};
		if let Err(err) = self.actuator.dispatch_action(center, ActionKind::Click) {
			tracing::warn!(error = %err, %label, "click failed");
			return Err(self.on_error(&err.to_string(), frame));
		}

		tracing::info!(%label, at = %center, "clicked");
		self.state.failures = 0;
		self.state.last_action = Some((label, self.clock.now()));
		Ok(())
	}

	fn on_idle(&mut self, frame: Option<&ie::OwnedImage>) -> Decision {
		if self.state.repetition >= self.policy.stuck_threshold {
			tracing::warn!(repetition = self.state.repetition, "screen looks stuck; backing off");
			self.snapshot("stuck_state", frame);
			self.set_phase(Phase::Waiting);
			self.clock.sleep(self.policy.stuck_pause);
			self.state.repetition = 0;
		}

		if let Some(frame) = frame
			&& let Some(gesture) = &self.gesture
			&& let Some(path) = ie::trace_path(frame.as_image(), gesture)
		{
			return self.drag(&path, frame);
		}

		self.state.failures += 1;
		if self.state.failures >= self.policy.failure_ceiling {
			tracing::warn!(failures = self.state.failures, "nothing detected for too long; cooling down");
			self.set_phase(Phase::Error);
			self.snapshot("detection_failure", frame);
			self.clock.sleep(self.policy.failure_cooldown);
			self.state.failures = 0;
			self.set_phase(Phase::Running);
		} else {
			self.set_phase(Phase::Waiting);
			self.clock.sleep(self.policy.idle_pause);
		}
		Decision::Continue
	}

	/// Drag along a traced trail. Counts as an action: failures reset.
	fn drag(&mut self, path: &DragPath, frame: &ie::OwnedImage) -> Decision {
		self.set_phase(Phase::ActingImmediate);
		let (from, to) = (path.start(), path.end());
		if let Err(err) = self.actuator.dispatch_action(from, ActionKind::Drag { to }) {
			tracing::warn!(error = %err, "drag failed");
			return self.on_error(&err.to_string(), Some(frame));
		}

		tracing::info!(%from, %to, points = path.points().len(), "dragged");
		self.state.failures = 0;
		self.clock.sleep(self.policy.drag_settle);
		self.set_phase(Phase::Running);
		Decision::Continue
	}

	fn on_error(&mut self, reason: &str, frame: Option<&ie::OwnedImage>) -> Decision {
		self.state.label = Label::Error;
		self.state.failures += 1;
		self.set_phase(Phase::Error);
		tracing::warn!(failures = self.state.failures, reason, "error cycle");
		self.snapshot("error_state", frame);
		self.clock.sleep(self.policy.error_pause);

		if self.state.failures >= self.policy.failure_ceiling {
			tracing::error!(failures = self.state.failures, "too many consecutive errors; stopping");
			self.state.failures = 0;
			return self.halt("error ceiling reached");
		}
		Decision::Continue
	}

	fn close_input(&mut self) {
		tracing::info!("operator input closed; shutting down when this session stops");
		self.input_closed = true;
	}

	fn halt(&mut self, why: &str) -> Decision {
		tracing::info!(why, "stopping session");
		self.state.running = false;
		self.set_phase(Phase::Stopped);
		Decision::Stop
	}

	fn manual_snapshot(&mut self) {
		match self.frames.capture_frame() {
			Ok(frame) => self.snapshots.submit("manual", &frame),
			Err(err) => tracing::warn!(error = %err, "screenshot failed"),
		}
	}

	fn snapshot(&self, tag: &str, frame: Option<&ie::OwnedImage>) {
		match frame {
			Some(frame) => self.snapshots.submit(tag, frame),
			None => tracing::debug!(tag, "no frame to snapshot"),
		}
	}

	fn set_phase(&mut self, phase: Phase) {
		if self.state.phase == phase {
			return;
		}
		tracing::debug!(from = ?self.state.phase, to = ?phase, "phase");
		self.state.phase = phase;
		if let Some(status) = &self.status {
			let _ = status.send(self.state.clone());
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;
	use std::sync::{Arc, Mutex};

	use ie::{Method, Point};

	use super::*;
	use crate::command::{self, Command};
	use crate::error::{ActuationError, CaptureError};

	struct Scripted(Mutex<VecDeque<Detection>>);

	impl Scripted {
		fn new(script: impl IntoIterator<Item = Detection>) -> Box<Self> {
			Box::new(Self(Mutex::new(script.into_iter().collect())))
		}
	}

	impl Perception for Scripted {
		fn perceive(&self, _frame: ie::Image) -> Detection {
			self.0.lock().expect("script").pop_front().unwrap_or_else(Detection::idle)
		}
	}

	struct Frames {
		fail: bool,
	}

	impl FrameSource for Frames {
		fn capture_frame(&mut self) -> Result<ie::OwnedImage, CaptureError> {
			if self.fail {
				return Err(CaptureError::WindowNotFound("game".to_string()));
			}
			Ok(ie::OwnedImage::from_rgb_image(&image::RgbImage::new(8, 8)))
		}
	}

	#[derive(Clone, Default)]
	struct Clicks {
		at: Arc<Mutex<Vec<(Point, ActionKind)>>>,
		fail: bool,
	}

	impl Actuator for Clicks {
		fn dispatch_action(&mut self, at: Point, kind: ActionKind) -> Result<(), ActuationError> {
			if self.fail {
				return Err(ActuationError::Dispatch("no pointer".to_string()));
			}
			self.at.lock().expect("clicks").push((at, kind));
			Ok(())
		}
	}

	impl Clicks {
		/// Points clicked, in order.
		fn taken(&self) -> Vec<Point> {
			self.actions()
				.into_iter()
				.filter(|(_, kind)| *kind == ActionKind::Click)
				.map(|(at, _)| at)
				.collect()
		}

		fn actions(&self) -> Vec<(Point, ActionKind)> {
			self.at.lock().expect("clicks").clone()
		}
	}

	#[derive(Clone)]
	struct FakeClock {
		start: Instant,
		slept: Arc<Mutex<Vec<Duration>>>,
	}

	impl FakeClock {
		fn new() -> Self {
			Self {
				start: Instant::now(),
				slept: Arc::default(),
			}
		}

		fn sleeps(&self) -> Vec<Duration> {
			self.slept.lock().expect("sleeps").clone()
		}

		fn count(&self, d: Duration) -> usize {
			self.sleeps().into_iter().filter(|s| *s == d).count()
		}
	}

	impl Clock for FakeClock {
		fn now(&self) -> Instant {
			self.start + self.slept.lock().expect("sleeps").iter().sum::<Duration>()
		}

		fn sleep(&self, duration: Duration) {
			self.slept.lock().expect("sleeps").push(duration);
		}
	}

	#[derive(Clone, Default)]
	struct Tags(Arc<Mutex<Vec<String>>>);

	impl SnapshotSink for Tags {
		fn submit(&self, tag: &str, _frame: &ie::OwnedImage) {
			self.0.lock().expect("tags").push(tag.to_string());
		}
	}

	impl Tags {
		fn taken(&self) -> Vec<String> {
			self.0.lock().expect("tags").clone()
		}
	}

	struct Rig {
		controller: Controller,
		tx: std::sync::mpsc::SyncSender<Command>,
		clicks: Clicks,
		clock: FakeClock,
		tags: Tags,
	}

	fn rig(perception: Box<dyn Perception>, frames: Frames, clicks: Clicks) -> Rig {
		let (tx, rx) = command::channel();
		let clock = FakeClock::new();
		let tags = Tags::default();
		let controller = Controller::new(perception, Box::new(frames), Box::new(clicks.clone()), rx, Policy::default())
			.with_clock(Box::new(clock.clone()))
			.with_snapshots(Box::new(tags.clone()));
		Rig { controller, tx, clicks, clock, tags }
	}

	fn found(label: Label) -> Detection {
		Detection::found(label, 0.9, Point::new(10, 20), Method::Template, "test")
	}

	fn secs(n: u64) -> Duration {
		Duration::from_secs(n)
	}

	#[test]
	fn repetition_counts_identical_labels() {
		let script = [
			Label::PrimaryAction,
			Label::PrimaryAction,
			Label::PrimaryAction,
			Label::ExitAction,
			Label::ExitAction,
		];
		let mut r = rig(Scripted::new(script.map(found)), Frames { fail: false }, Clicks::default());

		let mut seen = Vec::new();
		for _ in script {
			assert_eq!(r.controller.run_cycle(), Decision::Continue);
			seen.push(r.controller.state().repetition);
		}
		assert_eq!(seen, vec![0, 1, 2, 0, 1]);
	}

	#[test]
	fn immediate_click_then_settle() {
		let detection = Detection::found(Label::PrimaryAction, 0.91, Point::new(500, 300), Method::Template, "t");
		let mut r = rig(Scripted::new([detection]), Frames { fail: false }, Clicks::default());

		assert_eq!(r.controller.run_cycle(), Decision::Continue);
		assert_eq!(r.clicks.taken(), vec![Point::new(500, 300)]);
		assert_eq!(r.clock.sleeps(), vec![secs(4), secs(1)]);
		assert_eq!(r.controller.state().failures, 0);
		assert_eq!(r.controller.state().last_action.map(|(l, _)| l), Some(Label::PrimaryAction));
	}

	#[test]
	fn eleven_idle_cycles_back_off_once() {
		let mut r = rig(Scripted::new([]), Frames { fail: false }, Clicks::default());

		for _ in 0..11 {
			assert_eq!(r.controller.run_cycle(), Decision::Continue);
		}
		assert_eq!(r.clock.count(secs(10)), 1);
		assert_eq!(r.controller.state().repetition, 0);
		assert_eq!(r.tags.taken().iter().filter(|t| *t == "stuck_state").count(), 1);
		// Cycles 5 and 10 hit the failure ceiling.
		assert_eq!(r.clock.count(secs(30)), 2);
		assert!(r.clicks.taken().is_empty());
	}

	#[test]
	fn idle_failures_cool_down_at_the_ceiling() {
		let mut r = rig(Scripted::new([]), Frames { fail: false }, Clicks::default());

		for _ in 0..4 {
			r.controller.run_cycle();
		}
		assert_eq!(r.controller.state().failures, 4);
		assert_eq!(r.clock.count(secs(30)), 0);

		r.controller.run_cycle();
		assert_eq!(r.controller.state().failures, 0);
		assert_eq!(r.clock.count(secs(30)), 1);
		assert_eq!(r.tags.taken(), vec!["detection_failure".to_string()]);
	}

	#[test]
	fn repeated_errors_end_the_session() {
		let mut r = rig(Scripted::new([]), Frames { fail: true }, Clicks::default());
		let (status_tx, status_rx) = std::sync::mpsc::channel();
		r.controller = r.controller.with_status(status_tx);
		r.controller.state.running = true;

		let decisions = (0..5).map(|_| r.controller.run_cycle()).collect::<Vec<_>>();
		assert_eq!(decisions, vec![
			Decision::Continue,
			Decision::Continue,
			Decision::Continue,
			Decision::Continue,
			Decision::Stop,
		]);
		assert_eq!(r.controller.state().failures, 0);
		assert_eq!(r.controller.state().phase, Phase::Stopped);
		assert!(!r.controller.state().running);
		assert_eq!(r.clock.count(secs(5)), 5);
		// Capture failed, so there was never a frame to save.
		assert!(r.tags.taken().is_empty());

		let phases = status_rx.try_iter().map(|s| s.phase).collect::<Vec<_>>();
		assert_eq!(phases.iter().filter(|p| **p == Phase::Stopped).count(), 1);
		assert!(phases.contains(&Phase::Error));
	}

	#[test]
	fn delayed_label_waits_then_clicks() {
		let mut r = rig(
			Scripted::new([found(Label::ConfirmReturnDelayed)]),
			Frames { fail: false },
			Clicks::default(),
		);

		assert_eq!(r.controller.run_cycle(), Decision::Continue);
		assert_eq!(r.clicks.taken(), vec![Point::new(10, 20)]);
		let mut expected = vec![secs(5); 8];
		expected.extend([secs(3), secs(1)]);
		assert_eq!(r.clock.sleeps(), expected);
	}

	#[test]
	fn stop_during_delayed_wait_prevents_the_click() {
		let mut r = rig(
			Scripted::new([found(Label::ConfirmReturnDelayed)]),
			Frames { fail: false },
			Clicks::default(),
		);
		// The cycle's own poll consumes the Start; the countdown sees the Stop.
		r.tx.send(Command::Start).expect("send");
		r.tx.send(Command::Stop).expect("send");

		assert_eq!(r.controller.run_cycle(), Decision::Stop);
		assert!(r.clicks.taken().is_empty());
		assert_eq!(r.clock.sleeps(), vec![secs(5)]);
		assert_eq!(r.controller.state().phase, Phase::Stopped);
	}

	#[test]
	fn failed_click_is_an_error_cycle() {
		let clicks = Clicks { fail: true, ..Clicks::default() };
		let mut r = rig(Scripted::new([found(Label::ExitAction)]), Frames { fail: false }, clicks);
		let (status_tx, status_rx) = std::sync::mpsc::channel();
		r.controller = r.controller.with_status(status_tx);

		assert_eq!(r.controller.run_cycle(), Decision::Continue);
		let error = status_rx
			.try_iter()
			.find(|s| s.phase == Phase::Error)
			.expect("error phase reported");
		assert_eq!(error.label, Label::Error);
		assert_eq!(r.controller.state().failures, 1);
		assert_eq!(r.controller.state().phase, Phase::Error);
		assert_eq!(r.controller.state().label, Label::Error);
		assert_eq!(r.tags.taken(), vec!["error_state".to_string()]);
		assert_eq!(r.clock.sleeps(), vec![secs(5), secs(1)]);
	}

	#[test]
	fn reward_cooldown_suppresses_repeat_claims() {
		let mut r = rig(
			Scripted::new([found(Label::SecondaryReward), found(Label::SecondaryReward)]),
			Frames { fail: false },
			Clicks::default(),
		);

		r.controller.run_cycle();
		r.controller.run_cycle();
		assert_eq!(r.clicks.taken().len(), 1);
		assert_eq!(r.controller.state().failures, 0);
		assert_eq!(r.clock.sleeps(), vec![secs(1), secs(1), secs(3), secs(1)]);
	}

	#[test]
	fn screenshot_command_does_not_advance_state() {
		let mut r = rig(Scripted::new([found(Label::ExitAction)]), Frames { fail: false }, Clicks::default());
		r.tx.send(Command::Screenshot).expect("send");

		assert_eq!(r.controller.run_cycle(), Decision::Continue);
		assert_eq!(r.tags.taken(), vec!["manual".to_string()]);
		assert!(r.clicks.taken().is_empty());
		assert!(r.clock.sleeps().is_empty());

		// The scripted detection is still there for the next cycle.
		r.controller.run_cycle();
		assert_eq!(r.clicks.taken().len(), 1);
	}

	#[test]
	fn serve_runs_a_session_per_start() {
		let mut r = rig(Scripted::new([]), Frames { fail: false }, Clicks::default());
		let (status_tx, status_rx) = std::sync::mpsc::channel();
		r.controller = r.controller.with_status(status_tx);

		r.tx.send(Command::Start).expect("send");
		r.tx.send(Command::Stop).expect("send");
		r.tx.send(Command::EmergencyStop).expect("send");
		r.controller.serve();

		let phases = status_rx.try_iter().map(|s| s.phase).collect::<Vec<_>>();
		assert_eq!(phases, vec![Phase::Running, Phase::Stopped]);
		assert!(r.clicks.taken().is_empty());
	}

	fn trail_frame() -> ie::OwnedImage {
		let mut rgb = image::RgbImage::from_pixel(400, 300, image::Rgb([245, 245, 245]));
		for x in 120..260 {
			for y in 150..160 {
				rgb.put_pixel(x, y, image::Rgb([60, 50, 40]));
			}
		}
		ie::OwnedImage::from_rgb_image(&rgb)
	}

	struct Still(ie::OwnedImage);

	impl FrameSource for Still {
		fn capture_frame(&mut self) -> Result<ie::OwnedImage, CaptureError> {
			Ok(self.0.clone())
		}
	}

	fn gesture() -> Option<PathConfig> {
		Some(PathConfig {
			zone: ie::Region::new(100, 100, 200, 120),
			..PathConfig::default()
		})
	}

	#[test]
	fn idle_frame_with_a_trail_is_dragged_left_to_right() {
		let (_tx, rx) = command::channel();
		let clicks = Clicks::default();
		let clock = FakeClock::new();
		let mut controller = Controller::new(
			Scripted::new([]),
			Box::new(Still(trail_frame())),
			Box::new(clicks.clone()),
			rx,
			Policy::default(),
		)
		.with_clock(Box::new(clock.clone()))
		.with_gesture(gesture());

		assert_eq!(controller.run_cycle(), Decision::Continue);
		let actions = clicks.actions();
		assert_eq!(actions.len(), 1);
		let (from, kind) = actions[0];
		let ActionKind::Drag { to } = kind else {
			panic!("expected a drag, got {kind:?}");
		};
		assert_eq!((from.x, to.x), (120, 259));
		assert_eq!(controller.state().failures, 0);
		assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500), secs(1)]);
	}

	#[test]
	fn idle_without_a_trail_still_counts_as_a_failure() {
		let (_tx, rx) = command::channel();
		let clicks = Clicks::default();
		let blank = ie::OwnedImage::from_rgb_image(&image::RgbImage::from_pixel(400, 300, image::Rgb([245, 245, 245])));
		let mut controller = Controller::new(
			Scripted::new([]),
			Box::new(Still(blank)),
			Box::new(clicks.clone()),
			rx,
			Policy::default(),
		)
		.with_clock(Box::new(FakeClock::new()))
		.with_gesture(gesture());

		controller.run_cycle();
		assert!(clicks.actions().is_empty());
		assert_eq!(controller.state().failures, 1);
	}

	#[test]
	fn failed_drag_is_an_error_cycle() {
		let (_tx, rx) = command::channel();
		let clicks = Clicks { fail: true, ..Clicks::default() };
		let mut controller = Controller::new(
			Scripted::new([]),
			Box::new(Still(trail_frame())),
			Box::new(clicks),
			rx,
			Policy::default(),
		)
		.with_clock(Box::new(FakeClock::new()))
		.with_gesture(gesture());

		assert_eq!(controller.run_cycle(), Decision::Continue);
		assert_eq!(controller.state().phase, Phase::Error);
		assert_eq!(controller.state().label, Label::Error);
		assert_eq!(controller.state().failures, 1);
	}

	#[test]
	fn serve_returns_when_input_closes_while_stopped() {
		let mut r = rig(Scripted::new([]), Frames { fail: false }, Clicks::default());
		r.tx.send(Command::InputClosed).expect("send");

		// `r.tx` is still alive, so only the closed input ends this call.
		r.controller.serve();
		assert_eq!(r.controller.state().phase, Phase::Stopped);
		assert!(r.clock.sleeps().is_empty());
	}

	#[test]
	fn closed_input_lets_the_running_session_finish() {
		let mut r = rig(Scripted::new([]), Frames { fail: true }, Clicks::default());
		r.tx.send(Command::Start).expect("send");
		r.tx.send(Command::InputClosed).expect("send");

		r.controller.serve();
		// The session ran to the error ceiling before the controller exited.
		assert_eq!(r.clock.count(secs(5)), 5);
		assert!(!r.controller.state().running);
		assert_eq!(r.controller.state().phase, Phase::Stopped);
	}

	#[test]
	fn template_on_screen_is_clicked_at_its_centre() {
		use ie::fusion::{default_phrases, default_shapes};
		use ie::{Catalogue, Engine, FusionConfig, Template, TemplateBank, TextConfig, TextRecognizer};

		let button = image::GrayImage::from_fn(48, 24, |x, y| {
			let v = if x < 3 || y < 3 || x >= 45 || y >= 21 {
				20
			} else if (x / 6 + y / 4) % 2 == 0 {
				230
			} else {
				150
			};
			image::Luma([v])
		});
		let mut rgb = image::RgbImage::from_pixel(800, 600, image::Rgb([250, 250, 250]));
		for (x, y, p) in button.enumerate_pixels() {
			rgb.put_pixel(476 + x, 288 + y, image::Rgb([p.0[0]; 3]));
		}

		let bank = TemplateBank::from_templates([Template::new(Label::PrimaryAction, button)]);
		let catalogue = Catalogue::new(bank, default_phrases(), default_shapes()).expect("catalogue");
		let engine = Engine::new(
			Arc::new(catalogue),
			FusionConfig::default(),
			TextRecognizer::unavailable("not needed", TextConfig::default()),
		);

		let (_tx, rx) = command::channel();
		let clicks = Clicks::default();
		let clock = FakeClock::new();
		let mut controller = Controller::new(
			Box::new(engine),
			Box::new(Still(ie::OwnedImage::from_rgb_image(&rgb))),
			Box::new(clicks.clone()),
			rx,
			Policy::default(),
		)
		.with_clock(Box::new(clock.clone()));

		assert_eq!(controller.run_cycle(), Decision::Continue);
		assert_eq!(clicks.taken(), vec![Point::new(500, 300)]);
		assert_eq!(clock.sleeps(), vec![secs(4), secs(1)]);
	}
}
