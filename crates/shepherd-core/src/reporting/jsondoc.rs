use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::collector::ExecutableRecord;
use crate::error::{Error, Result};
use crate::reporting::{ReportWindow, Reporter};

pub const FORMAT: &str = "jsondoc";
pub const VERSION: u32 = 1;

/// Stable for the lifetime of this process.
pub fn producer_id() -> &'static str {
	static PRODUCER: OnceLock<String> = OnceLock::new();
	PRODUCER.get_or_init(|| uuid::Uuid::new_v4().to_string())
}

fn hostname() -> String {
	nix::unistd::gethostname()
		.map(|h| h.to_string_lossy().into_owned())
		.unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Serialize)]
struct Document<'a> {
	format: &'static str,
	version: u32,
	host: &'a str,
	producer: &'a str,
	watch_dir: &'a Path,
	started: u64,
	first_update: u64,
	last_update: u64,
	executables: &'a [ExecutableRecord],
}

/// Writes each snapshot to `<reports-dir>/jsondoc/<last_update>.json`.
///
/// Documents are written to a temporary file in the same directory and
/// renamed into place, so readers never see a partial file.
#[derive(Debug)]
pub struct JsonDocReporter {
	reports_dir: PathBuf,
	host: String,
}

impl JsonDocReporter {
	pub fn new(base_dir: &Path) -> Result<Self> {
		let reports_dir = base_dir.join(FORMAT);
		std::fs::create_dir_all(&reports_dir).map_err(|e| {
			Error::Config(format!(
				"failed to create reports directory {}: {}",
				reports_dir.display(),
				e
			))
		})?;

		tracing::debug!(
			producer = producer_id(),
			"initialized jsondoc reporter, metrics directory {}",
			reports_dir.display()
		);

		Ok(Self {
			reports_dir,
			host: hostname(),
		})
	}

	/// `<reports-dir>[:<period-secs>]`
	pub fn from_args(args: &[&str]) -> Result<(Self, Option<Duration>)> {
		let dir = match args.first() {
			Some(d) if !d.is_empty() => Path::new(*d),
			_ => {
				return Err(Error::Config(
					"missing jsondoc parameter(s), expected: jsondoc:<reports-dir>[:<dumping-period>]".into(),
				))
			}
		};

		let period = match args.get(1) {
			Some(p) => Some(
				p.parse::<u64>()
					.ok()
					.filter(|secs| *secs > 0)
					.map(Duration::from_secs)
					.ok_or_else(|| Error::Config(format!("malformed reports dumping period: {}", p)))?,
			),
			None => None,
		};

		Ok((Self::new(dir)?, period))
	}

	pub fn reports_dir(&self) -> &Path {
		&self.reports_dir
	}
}

impl Reporter for JsonDocReporter {
	fn name(&self) -> &'static str {
		FORMAT
	}

	fn dump_metrics(&mut self, records: &[ExecutableRecord], window: &ReportWindow<'_>) -> Result<()> {
		let doc = Document {
			format: FORMAT,
			version: VERSION,
			host: &self.host,
			producer: producer_id(),
			watch_dir: window.watch_dir,
			started: window.started,
			first_update: window.begin,
			last_update: window.end,
			executables: records,
		};

		let dump_path = self.reports_dir.join(format!("{}.json", window.end));
		tracing::debug!("dumping JSON metrics to {}", dump_path.display());

		let body = serde_json::to_vec_pretty(&doc)?;
		let mut tmp = tempfile::NamedTempFile::new_in(&self.reports_dir)?;
		tmp.write_all(&body)?;
		tmp.as_file().sync_all()?;
		tmp.persist(&dump_path)
			.map_err(|e| Error::Report(format!("{}: {}", dump_path.display(), e.error)))?;
		Ok(())
	}
}
