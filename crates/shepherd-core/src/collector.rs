//! OS-level introspection of managed processes.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::console::ConsoleLog;
use crate::lifecycle::{Counter, Gauge};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
#[cfg(any(target_os = "linux", test))]
const CLK_TCK: u64 = 100;

#[derive(Debug)]
pub enum CollectError {
	/// Process disappeared during collection.
	ProcessGone(u32),
	Io(std::io::Error),
	Parse(String),
	Os(String),
	Unsupported,
}

impl fmt::Display for CollectError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
			CollectError::Io(e) => write!(f, "I/O error: {}", e),
			CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
			CollectError::Os(msg) => write!(f, "OS error: {}", msg),
			CollectError::Unsupported => write!(f, "process introspection not supported on this platform"),
		}
	}
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
	fn from(e: std::io::Error) -> Self {
		CollectError::Io(e)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Transport {
	#[serde(rename = "udpv4")]
	UdpV4,
	#[serde(rename = "udpv6")]
	UdpV6,
	#[serde(rename = "tcpv4")]
	TcpV4,
	#[serde(rename = "tcpv6")]
	TcpV6,
}

/// Bound `ip:port` endpoints grouped by transport. Always reported in full.
pub type Endpoints = BTreeMap<Transport, Vec<String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessUsage {
	pub memory_mb: u64,
	pub cpu_ms: u64,
	pub files: u64,
}

pub trait ProcessSampler {
	fn sample(&mut self, pid: u32) -> Result<ProcessUsage, CollectError>;

	/// Endpoints of each of `pids` that has any.
	fn endpoints(&mut self, pids: &[u32]) -> Result<HashMap<u32, Endpoints>, CollectError>;
}

/// Lifecycle view of one supervised instance, as handed to the collector.
#[derive(Debug, Clone)]
pub struct Tracked<'a> {
	pub executable: &'a Path,
	pub pid: Option<u32>,
	pub runtime: Counter,
	pub exits: Counter,
	pub changes: Counter,
	pub console: &'a ConsoleLog,
}

/// Per-executable reporting record: OS metrics merged with lifecycle values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutableRecord {
	pub executable: PathBuf,
	pub runtime: Counter,
	pub memory: Gauge,
	pub cpu: Counter,
	pub files: Gauge,
	pub exits: Counter,
	pub changes: Counter,
	pub endpoints: Endpoints,
	pub console: ConsoleLog,
}

/// Builds one record per instance with a live pid. Instances that cannot be
/// introspected are logged and left out of this round.
pub fn collect_metrics<P: ProcessSampler + ?Sized>(sampler: &mut P, instances: &[Tracked<'_>]) -> Vec<ExecutableRecord> {
	let pids: Vec<u32> = instances.iter().filter_map(|i| i.pid).collect();
	if pids.is_empty() {
		return Vec::new();
	}

	let mut endpoints = match sampler.endpoints(&pids) {
		Ok(e) => e,
		Err(e) => {
			tracing::warn!("failed to enumerate network endpoints: {}", e);
			HashMap::new()
		}
	};

	let mut records = Vec::new();
	for instance in instances {
		let Some(pid) = instance.pid else {
			continue;
		};

		let usage = match sampler.sample(pid) {
			Ok(u) => u,
			Err(e) => {
				tracing::error!(executable = %instance.executable.display(), pid, "metrics collection failed: {}", e);
				continue;
			}
		};

		records.push(ExecutableRecord {
			executable: instance.executable.to_path_buf(),
			runtime: instance.runtime,
			memory: Gauge::new(usage.memory_mb),
			cpu: Counter::new(usage.cpu_ms),
			files: Gauge::new(usage.files),
			exits: instance.exits,
			changes: instance.changes,
			endpoints: endpoints.remove(&pid).unwrap_or_default(),
			console: instance.console.clone(),
		});
	}
	records
}

/// Sampler backed by the host OS: procfs on Linux, libproc on macOS, netstat2
/// for sockets everywhere.
pub struct OsSampler {
	#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
	proc_path: PathBuf,
}

impl Default for OsSampler {
	fn default() -> Self {
		Self::new("/proc")
	}
}

impl OsSampler {
	pub fn new(proc_path: impl Into<PathBuf>) -> Self {
		Self {
			proc_path: proc_path.into(),
		}
	}
}

impl ProcessSampler for OsSampler {
	#[cfg(target_os = "linux")]
	fn sample(&mut self, pid: u32) -> Result<ProcessUsage, CollectError> {
		sample_procfs(&self.proc_path, pid)
	}

	#[cfg(target_os = "macos")]
	fn sample(&mut self, pid: u32) -> Result<ProcessUsage, CollectError> {
		sample_libproc(pid)
	}

	#[cfg(not(any(target_os = "linux", target_os = "macos")))]
	fn sample(&mut self, _pid: u32) -> Result<ProcessUsage, CollectError> {
		Err(CollectError::Unsupported)
	}

	fn endpoints(&mut self, pids: &[u32]) -> Result<HashMap<u32, Endpoints>, CollectError> {
		use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo};

		let af = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
		let proto = ProtocolFlags::TCP | ProtocolFlags::UDP;
		let sockets = get_sockets_info(af, proto).map_err(|e| CollectError::Os(e.to_string()))?;

		let mut result: HashMap<u32, Endpoints> = HashMap::new();
		for si in &sockets {
			let (tcp, addr, port) = match &si.protocol_socket_info {
				ProtocolSocketInfo::Tcp(tcp) => (true, tcp.local_addr, tcp.local_port),
				ProtocolSocketInfo::Udp(udp) => (false, udp.local_addr, udp.local_port),
			};
			let transport = match (tcp, addr.is_ipv4()) {
				(true, true) => Transport::TcpV4,
				(true, false) => Transport::TcpV6,
				(false, true) => Transport::UdpV4,
				(false, false) => Transport::UdpV6,
			};
			for pid in si.associated_pids.iter().filter(|p| pids.contains(*p)) {
				result
					.entry(*pid)
					.or_default()
					.entry(transport)
					.or_default()
					.push(format!("{}:{}", addr, port));
			}
		}

		for endpoints in result.values_mut() {
			for addrs in endpoints.values_mut() {
				addrs.sort();
				addrs.dedup();
			}
		}
		Ok(result)
	}
}

#[cfg(target_os = "linux")]
fn sample_procfs(proc_path: &Path, pid: u32) -> Result<ProcessUsage, CollectError> {
	let proc_dir = proc_path.join(pid.to_string());
	let read = |name: &str| {
		std::fs::read_to_string(proc_dir.join(name)).map_err(|e| match e.kind() {
			std::io::ErrorKind::NotFound => CollectError::ProcessGone(pid),
			_ => CollectError::Io(e),
		})
	};

	let cpu_ticks = parse_stat_cpu_ticks(&read("stat")?)?;
	let rss_kb = parse_status_rss_kb(&read("status")?)?;
	let files = std::fs::read_dir(proc_dir.join("fd"))
		.map_err(|e| match e.kind() {
			std::io::ErrorKind::NotFound => CollectError::ProcessGone(pid),
			_ => CollectError::Io(e),
		})?
		.count() as u64;

	Ok(ProcessUsage {
		memory_mb: rss_kb / 1024,
		cpu_ms: cpu_ticks * 1000 / CLK_TCK,
		files,
	})
}

/// utime + stime from `/proc/[pid]/stat`, in clock ticks.
#[cfg(any(target_os = "linux", test))]
fn parse_stat_cpu_ticks(content: &str) -> Result<u64, CollectError> {
	// comm may contain spaces and parens; fields resume after the last ')'
	let rest = content
		.rfind(')')
		.map(|i| &content[i + 1..])
		.ok_or_else(|| CollectError::Parse("stat: missing comm".into()))?;
	let fields: Vec<&str> = rest.split_whitespace().collect();
	// fields[0] is state (field 3), utime is field 14, stime field 15
	let field = |idx: usize, name: &str| -> Result<u64, CollectError> {
		fields
			.get(idx)
			.and_then(|v| v.parse().ok())
			.ok_or_else(|| CollectError::Parse(format!("stat: bad {}", name)))
	};
	Ok(field(11, "utime")? + field(12, "stime")?)
}

/// `VmRSS` from `/proc/[pid]/status`, in kB. Kernel threads have none.
#[cfg(any(target_os = "linux", test))]
fn parse_status_rss_kb(content: &str) -> Result<u64, CollectError> {
	for line in content.lines() {
		if let Some(value) = line.strip_prefix("VmRSS:") {
			return value
				.split_whitespace()
				.next()
				.and_then(|v| v.parse().ok())
				.ok_or_else(|| CollectError::Parse(format!("status: bad VmRSS {:?}", value.trim())));
		}
	}
	Ok(0)
}

#[cfg(target_os = "macos")]
fn sample_libproc(pid: u32) -> Result<ProcessUsage, CollectError> {
	use libproc::file_info::ListFDs;
	use libproc::proc_pid::{listpidinfo, pidinfo};
	use libproc::task_info::TaskAllInfo;

	let info = pidinfo::<TaskAllInfo>(pid as i32, 0).map_err(CollectError::Os)?;
	let fds = listpidinfo::<ListFDs>(pid as i32, info.pbsd.pbi_nfiles as usize).map_err(CollectError::Os)?;

	Ok(ProcessUsage {
		memory_mb: info.ptinfo.pti_resident_size / 1024 / 1024,
		cpu_ms: mach_ticks_to_ms(info.ptinfo.pti_total_user + info.ptinfo.pti_total_system, mach_timebase()),
		files: fds.len() as u64,
	})
}

/// Task times are in mach absolute-time units; 1:1 with nanoseconds only on Intel.
#[cfg(target_os = "macos")]
fn mach_timebase() -> (u32, u32) {
	static TIMEBASE: std::sync::OnceLock<(u32, u32)> = std::sync::OnceLock::new();
	*TIMEBASE.get_or_init(|| {
		#[allow(deprecated)]
		let mut info = libc::mach_timebase_info { numer: 0, denom: 0 };
		// SAFETY: the kernel fills a caller-owned struct
		#[allow(deprecated)]
		let rc = unsafe { libc::mach_timebase_info(&mut info) };
		if rc != 0 || info.numer == 0 || info.denom == 0 {
			(1, 1)
		} else {
			(info.numer, info.denom)
		}
	})
}

#[cfg(any(target_os = "macos", test))]
fn mach_ticks_to_ms(ticks: u64, (numer, denom): (u32, u32)) -> u64 {
	let nanos = ticks as u128 * numer as u128 / denom.max(1) as u128;
	(nanos / 1_000_000) as u64
}
