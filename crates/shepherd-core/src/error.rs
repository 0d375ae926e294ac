use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum Error {
	/// Walking the watch directory failed; the whole scan is retried later.
	Scan { dir: PathBuf, source: io::Error },
	Config(String),
	Report(String),
	Io(io::Error),
	Json(serde_json::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Scan { dir, source } => {
				write!(f, "directory {} traversal failure: {}", dir.display(), source)
			}
			Error::Config(msg) => write!(f, "{}", msg),
			Error::Report(msg) => write!(f, "reporting failure: {}", msg),
			Error::Io(e) => write!(f, "I/O error: {}", e),
			Error::Json(e) => write!(f, "JSON error: {}", e),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Scan { source, .. } => Some(source),
			Error::Io(e) => Some(e),
			Error::Json(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Error::Io(e)
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Error::Json(e)
	}
}

pub type Result<T> = std::result::Result<T, Error>;
