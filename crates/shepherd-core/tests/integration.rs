use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime};

use nix::sys::signal::kill;
use nix::unistd::Pid;

use shepherd_core::collector::OsSampler;
use shepherd_core::reporting::{JsonDocReporter, NullReporter};
use shepherd_core::{InstanceState, ReportingManager, Supervisor, SupervisorConfig};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("shepherd-test-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::remove_dir_all(&dir);
	std::fs::create_dir_all(&dir).unwrap();
	std::fs::canonicalize(&dir).unwrap()
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
	let path = dir.join(name);
	std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
	path
}

fn config(watch_dir: &Path) -> SupervisorConfig {
	SupervisorConfig {
		watch_dir: watch_dir.to_path_buf(),
		poll_period_ms: 50,
		output_wait_ms: 50,
		terminate_grace_secs: 2,
		..SupervisorConfig::default()
	}
}

fn test_supervisor(name: &str) -> (Supervisor, PathBuf) {
	let dir = temp_dir(name);
	let reporting = ReportingManager::new(Box::new(NullReporter), Duration::from_secs(3600));
	(Supervisor::new(config(&dir), reporting), dir)
}

fn tick_until(sup: &mut Supervisor, what: &str, done: impl Fn(&Supervisor) -> bool) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while Instant::now() < deadline {
		sup.tick().unwrap();
		if done(sup) {
			return;
		}
		std::thread::sleep(Duration::from_millis(50));
	}
	panic!("timed out waiting for {}", what);
}

fn pid_alive(pid: u32) -> bool {
	kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
fn starts_executables_and_captures_output() {
	let (mut sup, dir) = test_supervisor("output");
	let exe = script(&dir, "hello.sh", "echo hello from stdout\necho hello from stderr >&2\nsleep 30");

	tick_until(&mut sup, "output", |s| {
		s.instance(&exe).is_some_and(|i| {
			let text: String = i.console().pages().map(|p| p.text.as_str()).collect();
			text.contains("from stdout") && text.contains("from stderr")
		})
	});

	let inst = sup.instance(&exe).unwrap();
	assert_eq!(inst.state(), InstanceState::Running);
	let pid = inst.pid().unwrap();
	assert!(pid_alive(pid));

	sup.stop_all();
	assert!(!pid_alive(pid));
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn chatty_child_is_not_blocked_on_its_pipe() {
	let (mut sup, dir) = test_supervisor("chatty");
	let marker = dir.join("done.marker");
	let exe = script(
		&dir,
		"chatty.sh",
		&format!("head -c 200000 /dev/zero | tr '\\0' x\ntouch {}\nsleep 30", marker.display()),
	);

	// far more than one page per tick; the child only finishes if every tick drains the pipe
	tick_until(&mut sup, "chatty child to finish writing", |_| marker.exists());

	let inst = sup.instance(&exe).unwrap();
	assert_eq!(inst.state(), InstanceState::Running);
	assert_eq!(inst.exits().value(), 0);
	let console = inst.console();
	assert!(console.len() <= console.capacity());
	assert!(console.pages().all(|p| !p.text.is_empty() && p.text.bytes().all(|b| b == b'x')));

	sup.stop_all();
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ignores_non_executable_files() {
	let (mut sup, dir) = test_supervisor("plain");
	std::fs::write(dir.join("notes.txt"), "not a program").unwrap();
	let exe = script(&dir, "idle.sh", "sleep 30");

	tick_until(&mut sup, "start", |s| s.instance(&exe).is_some_and(|i| i.pid().is_some()));
	assert_eq!(sup.instances().count(), 1);

	sup.stop_all();
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn restarts_modified_executable() {
	let (mut sup, dir) = test_supervisor("modified");
	let exe = script(&dir, "svc.sh", "sleep 30");
	tick_until(&mut sup, "start", |s| s.instance(&exe).is_some_and(|i| i.pid().is_some()));
	let first = sup.instance(&exe).unwrap().pid().unwrap();

	let file = std::fs::File::options().write(true).open(&exe).unwrap();
	file.set_modified(SystemTime::now() + Duration::from_secs(120)).unwrap();
	drop(file);

	tick_until(&mut sup, "restart", |s| {
		s.instance(&exe).and_then(|i| i.pid()).is_some_and(|pid| pid != first)
	});

	let inst = sup.instance(&exe).unwrap();
	assert_eq!(inst.changes().value(), 1);
	assert_eq!(inst.exits().value(), 0);
	assert!(!pid_alive(first));

	sup.stop_all();
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn respawns_crashing_executable() {
	let (mut sup, dir) = test_supervisor("crash");
	let exe = script(&dir, "crash.sh", "exit 3");

	tick_until(&mut sup, "two exits", |s| s.instance(&exe).is_some_and(|i| i.exits().value() >= 2));
	assert_eq!(sup.instance(&exe).unwrap().changes().value(), 0);

	sup.stop_all();
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stops_removed_executable() {
	let (mut sup, dir) = test_supervisor("removed");
	let exe = script(&dir, "gone.sh", "sleep 30");
	tick_until(&mut sup, "start", |s| s.instance(&exe).is_some_and(|i| i.pid().is_some()));
	let pid = sup.instance(&exe).unwrap().pid().unwrap();

	std::fs::remove_file(&exe).unwrap();
	sup.tick().unwrap();

	assert!(sup.instance(&exe).is_none());
	assert!(!pid_alive(pid));
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_watch_dir_is_a_scan_error() {
	let dir = temp_dir("missing").join("nope");
	let reporting = ReportingManager::new(Box::new(NullReporter), Duration::from_secs(3600));
	let mut sup = Supervisor::new(config(&dir), reporting);
	assert!(matches!(sup.tick(), Err(shepherd_core::Error::Scan { .. })));
}

#[test]
fn dumps_jsondoc_reports() {
	let dir = temp_dir("jsondoc");
	let watch = dir.join("watch");
	let reports = dir.join("reports");
	std::fs::create_dir_all(&watch).unwrap();
	let exe = script(&watch, "agent.sh", "echo up\nsleep 30");

	let started = SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.unwrap()
		.as_secs()
		- 10;
	let reporter = JsonDocReporter::new(&reports).unwrap();
	let reporting = ReportingManager::with_sampler(
		Box::new(reporter),
		Box::new(OsSampler::default()),
		Duration::from_secs(1),
		started,
	);
	let mut sup = Supervisor::new(config(&watch), reporting);

	let out = reports.join("jsondoc");
	tick_until(&mut sup, "report", |s| {
		s.instance(&exe).is_some_and(|i| i.pid().is_some())
			&& std::fs::read_dir(&out).map(|d| d.count() > 0).unwrap_or(false)
	});
	sup.stop_all();

	let entry = std::fs::read_dir(&out).unwrap().next().unwrap().unwrap();
	let name = entry.file_name().to_string_lossy().into_owned();
	assert!(name.ends_with(".json"), "unexpected file {}", name);

	let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(entry.path()).unwrap()).unwrap();
	assert_eq!(doc["format"], "jsondoc");
	assert_eq!(doc["started"], started);
	assert_eq!(doc["watch_dir"], watch.to_string_lossy().as_ref());
	assert!(doc["executables"].is_array());
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn run_stops_children_on_shutdown() {
	let (mut sup, dir) = test_supervisor("run");
	let exe = script(&dir, "loop.sh", "while true; do sleep 1; done");

	sup.run(tokio::time::sleep(Duration::from_millis(1500))).await;

	let inst = sup.instance(&exe).unwrap();
	assert_eq!(inst.state(), InstanceState::Died);
	assert_eq!(inst.pid(), None);
	assert!(inst.stopped().is_some());
	let _ = std::fs::remove_dir_all(&dir);
}
