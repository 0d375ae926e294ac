//! # shepherd-core
//!
//! Keeps every executable found under a watch directory running.
//!
//! Each tick the [`Supervisor`] drains process output into per-process
//! [`ConsoleLog`]s, rescans the directory, spawns, restarts or stops processes
//! and hands the instance set to the [`ReportingManager`], which periodically
//! dumps delta-encoded activity metrics through a pluggable [`Reporter`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use shepherd_core::{reporting, ReportingManager, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = SupervisorConfig {
//! 	watch_dir: "/srv/agents".into(),
//! 	..SupervisorConfig::default()
//! };
//! let (reporter, period) = reporting::configure("jsondoc:/var/run/reports:30").unwrap();
//! let reporting = ReportingManager::new(reporter, period.unwrap_or(config.reporting_period()));
//!
//! let mut supervisor = Supervisor::new(config, reporting);
//! supervisor.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod console;
pub mod error;
pub mod lifecycle;
pub mod process;
pub mod reporting;
pub mod scan;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use console::ConsoleLog;
pub use error::Error;
pub use lifecycle::{Counter, Gauge, GrowingValue};
pub use process::{ExitReport, ManagedProcess, PosixControl, ProcessControl};
pub use reporting::{ReportingManager, Reporter};
pub use supervisor::{Instance, InstanceState, Supervisor};

pub(crate) fn now_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
