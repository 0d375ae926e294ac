use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;

#[derive(Debug, PartialEq)]
pub enum LogTarget {
	Stderr,
	Stdout,
	File(PathBuf),
	Null,
}

pub fn parse_target(method: &str) -> Result<LogTarget, String> {
	match method.split_once(':') {
		None => match method {
			"stderr" => Ok(LogTarget::Stderr),
			"stdout" => Ok(LogTarget::Stdout),
			"null" => Ok(LogTarget::Null),
			"file" => Err("missing log file path, expected: file:<path>".to_string()),
			other => Err(format!(
				"unsupported logging method: {} (expected one of: stderr, stdout, file:<path>, null)",
				other
			)),
		},
		Some(("file", path)) if !path.is_empty() => Ok(LogTarget::File(PathBuf::from(path))),
		Some(("file", _)) => Err("missing log file path, expected: file:<path>".to_string()),
		Some((other, _)) => Err(format!("unsupported logging method: {}", other)),
	}
}

pub fn parse_level(level: &str) -> Result<Level, String> {
	level
		.parse::<Level>()
		.map_err(|_| format!("invalid log level: {} (expected error, warn, info, debug or trace)", level))
}

pub fn init(method: &str, level: &str) -> Result<(), String> {
	let target = parse_target(method)?;
	let builder = tracing_subscriber::fmt().with_max_level(parse_level(level)?);

	match target {
		LogTarget::Stderr => builder.with_writer(std::io::stderr).init(),
		LogTarget::Stdout => builder.with_writer(std::io::stdout).init(),
		LogTarget::File(path) => {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(&path)
				.map_err(|e| format!("failed to open log file {}: {}", path.display(), e))?;
			builder.with_ansi(false).with_writer(Mutex::new(file)).init()
		}
		LogTarget::Null => builder.with_writer(std::io::sink).init(),
	}
	Ok(())
}
