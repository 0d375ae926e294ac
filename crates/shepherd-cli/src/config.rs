use serde::Deserialize;
use std::path::{Path, PathBuf};

use shepherd_core::SupervisorConfig;

use crate::args::CliArgs;
use crate::paths;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileConfig {
	#[serde(default)]
	pub supervisor: SupervisorSection,
	#[serde(default)]
	pub console: ConsoleSection,
	#[serde(default)]
	pub reporting: ReportingSection,
	#[serde(default)]
	pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SupervisorSection {
	pub watch_dir: Option<PathBuf>,
	pub poll_period_ms: Option<u64>,
	pub scan_retry_secs: Option<u64>,
	pub terminate_grace_secs: Option<u64>,
	pub output_wait_ms: Option<u64>,
	pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConsoleSection {
	pub pages: Option<usize>,
	pub page_size: Option<usize>,
	pub drain_limit_bytes: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportingSection {
	pub method: Option<String>,
	pub period_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
	#[serde(default = "default_log_method")]
	pub method: String,
	#[serde(default = "default_log_level")]
	pub level: String,
}

impl Default for LoggingSection {
	fn default() -> Self {
		Self {
			method: default_log_method(),
			level: default_log_level(),
		}
	}
}

fn default_log_method() -> String {
	"stderr".to_string()
}
fn default_log_level() -> String {
	"info".to_string()
}

/// Everything the binary needs after merging the file with the flags.
#[derive(Debug, Clone)]
pub struct Settings {
	pub supervisor: SupervisorConfig,
	pub logging_method: String,
	pub log_level: String,
	pub pid_file: PathBuf,
}

/// An explicitly named file must parse; the default one only warns.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig, String> {
	if let Some(path) = explicit {
		let content = std::fs::read_to_string(path)
			.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
		return toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e));
	}

	let path = paths::config_path();
	if path.exists() {
		match std::fs::read_to_string(&path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return Ok(config),
				Err(e) => eprintln!("warning: failed to parse {}: {}", path.display(), e),
			},
			Err(e) => eprintln!("warning: failed to read {}: {}", path.display(), e),
		}
	}
	Ok(FileConfig::default())
}

pub fn resolve(file: FileConfig, args: &CliArgs) -> Result<Settings, String> {
	let defaults = SupervisorConfig::default();

	let watch_dir = args
		.watch_dir
		.clone()
		.or(file.supervisor.watch_dir)
		.ok_or_else(|| "missing watch directory, use --watch-dir <DIR>".to_string())?;

	let supervisor = SupervisorConfig {
		watch_dir,
		poll_period_ms: file.supervisor.poll_period_ms.unwrap_or(defaults.poll_period_ms),
		scan_retry_secs: file.supervisor.scan_retry_secs.unwrap_or(defaults.scan_retry_secs),
		terminate_grace_secs: file
			.supervisor
			.terminate_grace_secs
			.unwrap_or(defaults.terminate_grace_secs),
		output_wait_ms: file.supervisor.output_wait_ms.unwrap_or(defaults.output_wait_ms),
		console_pages: file.console.pages.unwrap_or(defaults.console_pages),
		console_page_size: file.console.page_size.unwrap_or(defaults.console_page_size),
		drain_limit_bytes: file.console.drain_limit_bytes.unwrap_or(defaults.drain_limit_bytes),
		reporting_method: args
			.reporting_method
			.clone()
			.or(file.reporting.method)
			.unwrap_or(defaults.reporting_method),
		reporting_period_secs: file.reporting.period_secs.unwrap_or(defaults.reporting_period_secs),
	};

	if supervisor.poll_period_ms == 0 {
		return Err("poll_period_ms must be greater than zero".to_string());
	}
	if supervisor.console_pages == 0 || supervisor.console_page_size == 0 || supervisor.drain_limit_bytes == 0 {
		return Err("console pages, page_size and drain_limit_bytes must be greater than zero".to_string());
	}
	if supervisor.reporting_period_secs == 0 {
		return Err("reporting period_secs must be greater than zero".to_string());
	}

	Ok(Settings {
		supervisor,
		logging_method: args.logging_method.clone().unwrap_or(file.logging.method),
		log_level: args.log_level.clone().unwrap_or(file.logging.level),
		pid_file: args
			.pid_file
			.clone()
			.or(file.supervisor.pid_file)
			.unwrap_or_else(paths::pid_path),
	})
}
