use crate::collector::ExecutableRecord;
use crate::error::Result;
use crate::reporting::{ReportWindow, Reporter};

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
	fn name(&self) -> &'static str {
		"null"
	}

	fn dump_metrics(&mut self, _records: &[ExecutableRecord], _window: &ReportWindow<'_>) -> Result<()> {
		Ok(())
	}
}
