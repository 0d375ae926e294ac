//! Periodic activity reporting.
//!
//! Once per reporting period the [`ReportingManager`] collects metrics for
//! every running instance, turns every growing value into "what is new since
//! the last report" and hands the records to the configured [`Reporter`].

pub mod jsondoc;
pub mod null;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::{self, ExecutableRecord, OsSampler, ProcessSampler, Tracked};
use crate::error::{Error, Result};
use crate::lifecycle::GrowingValue;

pub use jsondoc::JsonDocReporter;
pub use null::NullReporter;

pub const FORMATS: &[&str] = &["null", "jsondoc"];

/// Envelope data shared by every record of one dump.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportWindow<'a> {
	pub watch_dir: &'a Path,
	/// Supervisor start, unix seconds.
	pub started: u64,
	pub begin: u64,
	pub end: u64,
}

pub trait Reporter {
	fn name(&self) -> &'static str;

	/// Persists one snapshot. Errors are logged by the manager and never
	/// reach the supervisor loop.
	fn dump_metrics(&mut self, records: &[ExecutableRecord], window: &ReportWindow<'_>) -> Result<()>;
}

/// Builds a reporter from a `<format>[:<arg>...]` selector.
///
/// Returns the reporter and, when the selector carries one, a reporting
/// period overriding the default.
pub fn configure(method: &str) -> Result<(Box<dyn Reporter>, Option<Duration>)> {
	let mut parts = method.split(':');
	let format = parts.next().unwrap_or_default();
	let args: Vec<&str> = parts.collect();

	match format {
		"null" => Ok((Box::new(NullReporter), None)),
		"jsondoc" => {
			let (reporter, period) = JsonDocReporter::from_args(&args)?;
			Ok((Box::new(reporter), period))
		}
		other => Err(Error::Config(format!(
			"unsupported reporting format: {} (expected one of: {})",
			other,
			FORMATS.join(", ")
		))),
	}
}

#[derive(Debug, Default, Clone, Copy)]
struct Baseline {
	runtime: u64,
	memory: u64,
	cpu: u64,
	files: u64,
	exits: u64,
	changes: u64,
	console: u64,
}

pub struct ReportingManager {
	reporter: Box<dyn Reporter>,
	sampler: Box<dyn ProcessSampler>,
	period: Duration,
	started: u64,
	last_dump: u64,
	next_dump: u64,
	baselines: HashMap<PathBuf, Baseline>,
}

impl ReportingManager {
	pub fn new(reporter: Box<dyn Reporter>, period: Duration) -> Self {
		Self::with_sampler(reporter, Box::new(OsSampler::default()), period, crate::now_secs())
	}

	pub fn with_sampler(reporter: Box<dyn Reporter>, sampler: Box<dyn ProcessSampler>, period: Duration, started: u64) -> Self {
		tracing::info!(
			"using {:?} activity reporting method, period {}s",
			reporter.name(),
			period.as_secs()
		);
		Self {
			reporter,
			sampler,
			period,
			started,
			last_dump: started,
			next_dump: started + period.as_secs(),
			baselines: HashMap::new(),
		}
	}

	pub fn started(&self) -> u64 {
		self.started
	}

	pub fn next_dump(&self) -> u64 {
		self.next_dump
	}

	/// Called every supervisor tick; a no-op until the next dump is due.
	pub fn process_metrics(&mut self, watch_dir: &Path, instances: &[Tracked<'_>], now: u64) {
		if now < self.next_dump {
			return;
		}

		let begin = self.last_dump;
		self.last_dump = now;
		self.next_dump = now + self.period.as_secs();

		let mut records = collector::collect_metrics(self.sampler.as_mut(), instances);
		for record in &mut records {
			let baseline = self.baselines.entry(record.executable.clone()).or_default();
			advance(&mut record.runtime, &mut baseline.runtime);
			advance(&mut record.memory, &mut baseline.memory);
			advance(&mut record.cpu, &mut baseline.cpu);
			advance(&mut record.files, &mut baseline.files);
			advance(&mut record.exits, &mut baseline.exits);
			advance(&mut record.changes, &mut baseline.changes);
			advance(&mut record.console, &mut baseline.console);
		}

		// forget executables that are no longer tracked
		self.baselines
			.retain(|path, _| instances.iter().any(|i| i.executable == path.as_path()));

		let window = ReportWindow {
			watch_dir,
			started: self.started,
			begin,
			end: now,
		};
		tracing::debug!(executables = records.len(), begin, end = now, "dumping activity report");

		if let Err(e) = self.reporter.dump_metrics(&records, &window) {
			tracing::error!(reporter = self.reporter.name(), "failed to dump metrics: {}", e);
		}
	}
}

fn advance<V: GrowingValue>(value: &mut V, baseline: &mut u64) {
	let delta = value.added_content(*baseline);
	*baseline = value.latest();
	*value = delta;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collector::{CollectError, Endpoints, ProcessUsage};
	use crate::console::ConsoleLog;
	use crate::lifecycle::{Counter, Gauge};
	use std::cell::RefCell;
	use std::rc::Rc;

	#[derive(Default)]
	struct Recorded {
		dumps: Vec<(Vec<ExecutableRecord>, u64, u64, u64)>,
	}

	struct RecordingReporter {
		out: Rc<RefCell<Recorded>>,
		fail: bool,
	}

	impl Reporter for RecordingReporter {
		fn name(&self) -> &'static str {
			"recording"
		}

		fn dump_metrics(&mut self, records: &[ExecutableRecord], window: &ReportWindow<'_>) -> Result<()> {
			self.out
				.borrow_mut()
				.dumps
				.push((records.to_vec(), window.started, window.begin, window.end));
			if self.fail {
				return Err(Error::Report("disk full".into()));
			}
			Ok(())
		}
	}

	struct StaticSampler {
		usage: Rc<RefCell<ProcessUsage>>,
	}

	impl ProcessSampler for StaticSampler {
		fn sample(&mut self, pid: u32) -> std::result::Result<ProcessUsage, CollectError> {
			if pid == 0 {
				return Err(CollectError::ProcessGone(pid));
			}
			Ok(*self.usage.borrow())
		}

		fn endpoints(&mut self, _pids: &[u32]) -> std::result::Result<HashMap<u32, Endpoints>, CollectError> {
			Ok(HashMap::new())
		}
	}

	fn manager(fail: bool) -> (ReportingManager, Rc<RefCell<Recorded>>, Rc<RefCell<ProcessUsage>>) {
		let out = Rc::new(RefCell::new(Recorded::default()));
		let usage = Rc::new(RefCell::new(ProcessUsage { memory_mb: 5, cpu_ms: 100, files: 3 }));
		let mgr = ReportingManager::with_sampler(
			Box::new(RecordingReporter { out: out.clone(), fail }),
			Box::new(StaticSampler { usage: usage.clone() }),
			Duration::from_secs(15),
			1000,
		);
		(mgr, out, usage)
	}

	fn tracked<'a>(path: &'a Path, runtime: u64, exits: u64, console: &'a ConsoleLog) -> Tracked<'a> {
		Tracked {
			executable: path,
			pid: Some(42),
			runtime: Counter::new(runtime),
			exits: Counter::new(exits),
			changes: Counter::new(0),
			console,
		}
	}

	#[test]
	fn nothing_happens_before_the_deadline() {
		let (mut mgr, out, _) = manager(false);
		let console = ConsoleLog::default();
		let path = PathBuf::from("/w/a");
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 1, 0, &console)], 1014);
		assert!(out.borrow().dumps.is_empty());
		assert_eq!(mgr.next_dump(), 1015);
	}

	#[test]
	fn reports_deltas_against_last_report() {
		let (mut mgr, out, usage) = manager(false);
		let path = PathBuf::from("/w/a");
		let mut console = ConsoleLog::default();
		console.add("boot\n", 1001);

		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 15, 1, &console)], 1015);
		assert_eq!(mgr.next_dump(), 1030);

		console.add("ready\n", 1020);
		usage.borrow_mut().cpu_ms = 250;
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 30, 1, &console)], 1030);

		let dumps = &out.borrow().dumps;
		assert_eq!(dumps.len(), 2);

		let (first, started, begin, end) = &dumps[0];
		assert_eq!((*started, *begin, *end), (1000, 1000, 1015));
		assert_eq!(first[0].runtime, Counter::new(15));
		assert_eq!(first[0].cpu, Counter::new(100));
		assert_eq!(first[0].exits, Counter::new(1));
		assert_eq!(first[0].console.len(), 1);

		let (second, _, begin, end) = &dumps[1];
		assert_eq!((*begin, *end), (1015, 1030));
		assert_eq!(second[0].runtime, Counter::new(15));
		assert_eq!(second[0].cpu, Counter::new(150));
		assert_eq!(second[0].exits, Counter::new(0));
		assert_eq!(second[0].memory, Gauge::new(5));
		assert_eq!(second[0].files, Gauge::new(3));
		let pages: Vec<&str> = second[0].console.pages().map(|p| p.text.as_str()).collect();
		assert_eq!(pages, vec!["ready\n"]);
	}

	#[test]
	fn counter_reset_reports_zero() {
		let (mut mgr, out, usage) = manager(false);
		let path = PathBuf::from("/w/a");
		let console = ConsoleLog::default();

		usage.borrow_mut().cpu_ms = 5000;
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 15, 0, &console)], 1015);
		// process restarted, cpu time starts over
		usage.borrow_mut().cpu_ms = 20;
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 30, 1, &console)], 1030);

		let dumps = &out.borrow().dumps;
		assert_eq!(dumps[1].0[0].cpu, Counter::new(0));
	}

	#[test]
	fn reporter_failure_is_contained() {
		let (mut mgr, out, _) = manager(true);
		let path = PathBuf::from("/w/a");
		let console = ConsoleLog::default();
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 15, 0, &console)], 1015);
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 30, 0, &console)], 1030);
		assert_eq!(out.borrow().dumps.len(), 2);
		assert_eq!(mgr.next_dump(), 1045);
	}

	#[test]
	fn baselines_of_forgotten_executables_are_dropped() {
		let (mut mgr, out, _) = manager(false);
		let path = PathBuf::from("/w/a");
		let console = ConsoleLog::default();
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 15, 2, &console)], 1015);
		mgr.process_metrics(Path::new("/w"), &[], 1030);
		// same path tracked again from scratch
		mgr.process_metrics(Path::new("/w"), &[tracked(&path, 4, 0, &console)], 1045);

		let dumps = &out.borrow().dumps;
		assert!(dumps[1].0.is_empty());
		assert_eq!(dumps[2].0[0].runtime, Counter::new(4));
	}

	#[test]
	fn configure_selects_reporter() {
		let (reporter, period) = configure("null").unwrap();
		assert_eq!(reporter.name(), "null");
		assert_eq!(period, None);

		let dir = tempfile::tempdir().unwrap();
		let method = format!("jsondoc:{}:30", dir.path().display());
		let (reporter, period) = configure(&method).unwrap();
		assert_eq!(reporter.name(), "jsondoc");
		assert_eq!(period, Some(Duration::from_secs(30)));
		assert!(dir.path().join("jsondoc").is_dir());
	}

	#[test]
	fn configure_rejects_bad_selectors() {
		assert!(matches!(configure("xml"), Err(Error::Config(_))));
		assert!(matches!(configure("jsondoc"), Err(Error::Config(_))));
		let dir = tempfile::tempdir().unwrap();
		let method = format!("jsondoc:{}:soon", dir.path().display());
		assert!(matches!(configure(&method), Err(Error::Config(_))));
	}
}
