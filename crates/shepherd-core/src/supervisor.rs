use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::collector::Tracked;
use crate::config::SupervisorConfig;
use crate::console::ConsoleLog;
use crate::error::Result;
use crate::lifecycle::Counter;
use crate::process::{ManagedProcess, PosixControl, ProcessControl, Termination};
use crate::reporting::ReportingManager;
use crate::scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
	Added,
	Running,
	Changed,
	Died,
	Removed,
}

impl InstanceState {
	pub fn is_running(&self) -> bool {
		matches!(self, InstanceState::Running)
	}
}

/// One managed executable, identified by its absolute path.
pub struct Instance<P> {
	executable: PathBuf,
	modified: SystemTime,
	state: InstanceState,
	process: Option<P>,
	created: u64,
	started: Option<u64>,
	stopped: Option<u64>,
	runtime: Counter,
	changes: Counter,
	exits: Counter,
	console: ConsoleLog,
	// incomplete UTF-8 sequence left over from the previous read
	partial: Vec<u8>,
}

impl<P: ManagedProcess> Instance<P> {
	fn new(executable: PathBuf, modified: SystemTime, now: u64, console: ConsoleLog) -> Self {
		Self {
			executable,
			modified,
			state: InstanceState::Added,
			process: None,
			created: now,
			started: None,
			stopped: None,
			runtime: Counter::default(),
			changes: Counter::default(),
			exits: Counter::default(),
			console,
			partial: Vec::new(),
		}
	}

	pub fn executable(&self) -> &Path {
		&self.executable
	}

	pub fn state(&self) -> InstanceState {
		self.state
	}

	/// Only a running instance has a pid.
	pub fn pid(&self) -> Option<u32> {
		match self.state {
			InstanceState::Running => self.process.as_ref().map(|p| p.pid()),
			_ => None,
		}
	}

	pub fn created(&self) -> u64 {
		self.created
	}

	pub fn started(&self) -> Option<u64> {
		self.started
	}

	pub fn stopped(&self) -> Option<u64> {
		self.stopped
	}

	pub fn runtime(&self) -> Counter {
		self.runtime
	}

	pub fn changes(&self) -> Counter {
		self.changes
	}

	pub fn exits(&self) -> Counter {
		self.exits
	}

	pub fn console(&self) -> &ConsoleLog {
		&self.console
	}

	fn pid_label(&self) -> String {
		self.process
			.as_ref()
			.map(|p| p.pid().to_string())
			.unwrap_or_else(|| "?".to_string())
	}
}

pub struct Supervisor<C: ProcessControl = PosixControl> {
	config: SupervisorConfig,
	control: C,
	instances: BTreeMap<PathBuf, Instance<C::Process>>,
	reporting: ReportingManager,
}

impl Supervisor<PosixControl> {
	pub fn new(config: SupervisorConfig, reporting: ReportingManager) -> Self {
		Self::with_control(config, PosixControl, reporting)
	}
}

impl<C: ProcessControl> Supervisor<C> {
	pub fn with_control(config: SupervisorConfig, control: C, reporting: ReportingManager) -> Self {
		Self {
			config,
			control,
			instances: BTreeMap::new(),
			reporting,
		}
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub fn instances(&self) -> impl Iterator<Item = &Instance<C::Process>> {
		self.instances.values()
	}

	pub fn instance(&self, executable: &Path) -> Option<&Instance<C::Process>> {
		self.instances.get(executable)
	}

	/// Runs ticks until `shutdown` resolves, then stops every process.
	pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
		tracing::info!("watching directory {}", self.config.watch_dir.display());
		tokio::pin!(shutdown);

		loop {
			let pause = match self.tick() {
				Ok(()) => self.config.poll_period(),
				Err(e) => {
					tracing::error!("{}", e);
					self.config.scan_retry()
				}
			};

			tokio::select! {
				_ = tokio::time::sleep(pause) => {}
				_ = &mut shutdown => {
					tracing::info!("shutting down");
					break;
				}
			}
		}

		self.stop_all();
	}

	/// One pass: drain output, rescan, apply transitions, report.
	///
	/// A scan failure is returned before any instance is touched.
	pub fn tick(&mut self) -> Result<()> {
		self.drain_output(crate::now_secs());

		let found = scan::scan_executables(&self.config.watch_dir)?;
		let now = crate::now_secs();
		self.observe(&found, now);
		self.apply(now);
		self.report(now);
		Ok(())
	}

	/// Terminates every live process. Instances stay tracked as died.
	pub fn stop_all(&mut self) {
		let grace = self.config.terminate_grace();
		let now = crate::now_secs();
		for instance in self.instances.values_mut() {
			if instance.process.is_some() {
				stop_instance(instance, grace, now);
				instance.state = InstanceState::Died;
			}
		}
	}

	/// Keeps reading until one wait finds nothing ready, so a chatty child
	/// never blocks on a full pipe. Bounded by the poll period and, per
	/// process, by `drain_limit_bytes`.
	fn drain_output(&mut self, now: u64) {
		let page_size = self.config.console_page_size;
		let limit = self.config.drain_limit_bytes;
		let deadline = Instant::now() + self.config.poll_period().max(self.config.output_wait());

		let mut drains: BTreeMap<PathBuf, Drain> = self
			.instances
			.iter()
			.filter(|(_, i)| i.state.is_running() && i.process.is_some())
			.map(|(path, _)| (path.clone(), Drain::default()))
			.collect();

		while Instant::now() < deadline {
			let ready: Vec<PathBuf> = {
				let (paths, processes): (Vec<&PathBuf>, Vec<&C::Process>) = drains
					.iter()
					.filter(|(_, d)| !d.closed)
					.filter_map(|(path, _)| self.instances.get(path)?.process.as_ref().map(|p| (path, p)))
					.unzip();
				if processes.is_empty() {
					break;
				}

				match self.control.wait_output(&processes, self.config.output_wait()) {
					Ok(ready) => ready.into_iter().filter_map(|i| paths.get(i).map(|p| (*p).clone())).collect(),
					Err(e) => {
						tracing::error!("waiting for process output failed: {}", e);
						break;
					}
				}
			};
			if ready.is_empty() {
				break;
			}

			for path in ready {
				if let (Some(instance), Some(drain)) = (self.instances.get_mut(&path), drains.get_mut(&path)) {
					drain_ready(instance, drain, page_size, limit, now);
				}
			}
		}

		for (path, drain) in &drains {
			if drain.dropped > 0 {
				tracing::warn!(
					executable = %path.display(),
					"dropped {} bytes of output over the {} byte per-tick limit",
					drain.dropped,
					limit
				);
			}
		}
	}

	fn observe(&mut self, found: &BTreeMap<PathBuf, SystemTime>, now: u64) {
		let (pages, page_size) = (self.config.console_pages, self.config.console_page_size);

		for (path, modified) in found {
			let instance = self.instances.entry(path.clone()).or_insert_with(|| {
				tracing::info!("start tracking executable {}", path.display());
				Instance::new(path.clone(), *modified, now, ConsoleLog::new(pages, page_size))
			});

			if instance.modified != *modified {
				instance.modified = *modified;
				instance.state = InstanceState::Changed;
				instance.changes += 1;
				tracing::info!(
					"existing executable {} (PID {}) has changed",
					path.display(),
					instance.pid_label()
				);
			}

			if instance.state.is_running() {
				check_exit(instance, now);
			}
		}

		let removed: BTreeSet<PathBuf> = self
			.instances
			.keys()
			.filter(|path| !found.contains_key(*path))
			.cloned()
			.collect();
		for path in removed {
			if let Some(instance) = self.instances.get_mut(&path) {
				instance.state = InstanceState::Removed;
				instance.changes += 1;
				tracing::info!(
					"existing executable {} (PID {}) has been removed",
					path.display(),
					instance.pid_label()
				);
			}
		}
	}

	fn apply(&mut self, now: u64) {
		let grace = self.config.terminate_grace();
		let mut forgotten = Vec::new();

		for (path, instance) in self.instances.iter_mut() {
			match instance.state {
				InstanceState::Added | InstanceState::Died => {
					spawn_instance(&mut self.control, instance, now);
				}
				InstanceState::Changed | InstanceState::Removed => {
					stop_instance(instance, grace, now);
					if instance.state == InstanceState::Changed {
						instance.state = InstanceState::Died;
					} else {
						forgotten.push(path.clone());
					}
				}
				InstanceState::Running => {
					instance.runtime = Counter::new(now.saturating_sub(instance.created));
				}
			}
		}

		for path in forgotten {
			self.instances.remove(&path);
			tracing::info!("stopped tracking executable {}", path.display());
		}
	}

	fn report(&mut self, now: u64) {
		let tracked: Vec<Tracked<'_>> = self
			.instances
			.values()
			.map(|i| Tracked {
				executable: &i.executable,
				pid: i.pid(),
				runtime: i.runtime,
				exits: i.exits,
				changes: i.changes,
				console: &i.console,
			})
			.collect();
		self.reporting.process_metrics(&self.config.watch_dir, &tracked, now);
	}
}

/// Per-tick read accounting for one process.
#[derive(Debug, Default)]
struct Drain {
	kept: usize,
	dropped: usize,
	closed: bool,
}

fn drain_ready<P: ManagedProcess>(instance: &mut Instance<P>, drain: &mut Drain, page_size: usize, limit: usize, now: u64) {
	let Some(process) = instance.process.as_mut() else {
		drain.closed = true;
		return;
	};

	// leave room for the carried-over tail so a page is never cut mid-character
	let budget = page_size.saturating_sub(instance.partial.len()).max(1);
	let bytes = match process.read_output(budget) {
		Ok(b) => b,
		Err(e) => {
			tracing::error!(executable = %instance.executable.display(), "reading process output failed: {}", e);
			drain.closed = true;
			return;
		}
	};
	// ready but empty: end of file
	if bytes.is_empty() {
		drain.closed = true;
		return;
	}

	if drain.kept >= limit {
		drain.dropped += bytes.len();
		if drain.dropped >= limit {
			drain.closed = true;
		}
		return;
	}
	drain.kept += bytes.len();

	let text = decode_output(&mut instance.partial, &bytes);
	if text.is_empty() {
		return;
	}
	instance.console.add(&text, now);

	tracing::debug!(executable = %instance.executable.display(), "output from process begins");
	tracing::debug!("{}", text);
	tracing::debug!(executable = %instance.executable.display(), "output from process ends");
}

/// Decodes `bytes` after whatever `carry` holds. Invalid sequences are
/// dropped; an incomplete trailing sequence stays in `carry`.
fn decode_output(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
	carry.extend_from_slice(bytes);

	let mut text = String::new();
	let mut rest: &[u8] = carry.as_slice();
	loop {
		match std::str::from_utf8(rest) {
			Ok(valid) => {
				text.push_str(valid);
				rest = &[];
				break;
			}
			Err(e) => {
				let (valid, after) = rest.split_at(e.valid_up_to());
				text.push_str(std::str::from_utf8(valid).unwrap_or_default());
				match e.error_len() {
					Some(bad) => rest = &after[bad..],
					None => {
						rest = after;
						break;
					}
				}
			}
		}
	}

	let tail = rest.to_vec();
	*carry = tail;
	text
}

fn check_exit<P: ManagedProcess>(instance: &mut Instance<P>, now: u64) {
	let Some(process) = instance.process.as_mut() else {
		instance.state = InstanceState::Died;
		return;
	};

	match process.try_exit() {
		Ok(Some(exit)) => {
			let pid = process.pid();
			let uptime = now.saturating_sub(instance.started.unwrap_or(now));
			// dropping the handle closes our end of the pipe
			instance.process = None;
			instance.state = InstanceState::Died;
			instance.stopped = Some(now);
			instance.exits += 1;
			tracing::info!(
				"executable {} (PID {}) has died ({}), uptime {}s",
				instance.executable.display(),
				pid,
				exit,
				uptime
			);
		}
		Ok(None) => {}
		Err(e) => {
			tracing::warn!(executable = %instance.executable.display(), "exit check failed: {}", e);
		}
	}
}

fn spawn_instance<C: ProcessControl>(control: &mut C, instance: &mut Instance<C::Process>, now: u64) {
	match control.spawn(&instance.executable) {
		Ok(process) => {
			tracing::info!(
				"executable {} (PID {}) has been started",
				instance.executable.display(),
				process.pid()
			);
			instance.process = Some(process);
			instance.partial.clear();
			instance.state = InstanceState::Running;
			instance.started = Some(now);
		}
		Err(e) => {
			// retried on every tick while the instance stays pending
			tracing::error!("executable {} failed to start: {}", instance.executable.display(), e);
		}
	}
}

fn stop_instance<P: ManagedProcess>(instance: &mut Instance<P>, grace: Duration, now: u64) {
	let Some(mut process) = instance.process.take() else {
		return;
	};
	let pid = process.pid();

	match process.terminate(grace) {
		Ok(Termination::Graceful) => {
			tracing::info!("executable {} (PID {}) has been stopped", instance.executable.display(), pid);
		}
		Ok(Termination::Killed) => {
			tracing::warn!(
				"executable {} (PID {}) did not stop gracefully, killed",
				instance.executable.display(),
				pid
			);
		}
		Err(e) => {
			tracing::error!("failed to stop executable {} (PID {}): {}", instance.executable.display(), pid, e);
		}
	}
	instance.stopped = Some(now);
}
