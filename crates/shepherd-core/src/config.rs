use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::console::{DEFAULT_PAGES, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default)]
	pub watch_dir: PathBuf,
	#[serde(default = "default_poll_period_ms")]
	pub poll_period_ms: u64,
	#[serde(default = "default_scan_retry_secs")]
	pub scan_retry_secs: u64,
	#[serde(default = "default_terminate_grace_secs")]
	pub terminate_grace_secs: u64,
	#[serde(default = "default_output_wait_ms")]
	pub output_wait_ms: u64,
	#[serde(default = "default_console_pages")]
	pub console_pages: usize,
	#[serde(default = "default_console_page_size")]
	pub console_page_size: usize,
	/// Output kept per process per tick; the excess is read and dropped.
	#[serde(default = "default_drain_limit_bytes")]
	pub drain_limit_bytes: usize,
	#[serde(default = "default_reporting_method")]
	pub reporting_method: String,
	#[serde(default = "default_reporting_period_secs")]
	pub reporting_period_secs: u64,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			watch_dir: PathBuf::new(),
			poll_period_ms: default_poll_period_ms(),
			scan_retry_secs: default_scan_retry_secs(),
			terminate_grace_secs: default_terminate_grace_secs(),
			output_wait_ms: default_output_wait_ms(),
			console_pages: default_console_pages(),
			console_page_size: default_console_page_size(),
			drain_limit_bytes: default_drain_limit_bytes(),
			reporting_method: default_reporting_method(),
			reporting_period_secs: default_reporting_period_secs(),
		}
	}
}

impl SupervisorConfig {
	pub fn poll_period(&self) -> Duration {
		Duration::from_millis(self.poll_period_ms)
	}

	pub fn scan_retry(&self) -> Duration {
		Duration::from_secs(self.scan_retry_secs)
	}

	pub fn terminate_grace(&self) -> Duration {
		Duration::from_secs(self.terminate_grace_secs)
	}

	pub fn output_wait(&self) -> Duration {
		Duration::from_millis(self.output_wait_ms)
	}

	pub fn reporting_period(&self) -> Duration {
		Duration::from_secs(self.reporting_period_secs)
	}
}

fn default_poll_period_ms() -> u64 {
	1000
}
fn default_scan_retry_secs() -> u64 {
	10
}
fn default_terminate_grace_secs() -> u64 {
	3
}
fn default_output_wait_ms() -> u64 {
	100
}
fn default_console_pages() -> usize {
	DEFAULT_PAGES
}
fn default_console_page_size() -> usize {
	DEFAULT_PAGE_SIZE
}
fn default_drain_limit_bytes() -> usize {
	256 * 1024
}
fn default_reporting_method() -> String {
	"null".to_string()
}
fn default_reporting_period_secs() -> u64 {
	15
}
