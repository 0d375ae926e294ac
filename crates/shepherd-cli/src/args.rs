use std::path::PathBuf;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CliArgs {
	pub watch_dir: Option<PathBuf>,
	pub reporting_method: Option<String>,
	pub logging_method: Option<String>,
	pub log_level: Option<String>,
	pub config: Option<PathBuf>,
	pub pid_file: Option<PathBuf>,
	pub daemonize: bool,
}

#[derive(Debug, PartialEq)]
pub enum Command {
	Run(CliArgs),
	Help,
	Version,
}

pub fn parse(args: &[String]) -> Result<Command, String> {
	let mut parsed = CliArgs::default();
	let mut iter = args.iter();

	while let Some(arg) = iter.next() {
		let (flag, inline) = match arg.split_once('=') {
			Some((f, v)) if f.starts_with("--") => (f, Some(v.to_string())),
			_ => (arg.as_str(), None),
		};

		let mut value = |name: &str| -> Result<String, String> {
			match inline.clone().or_else(|| iter.next().cloned()) {
				Some(v) if !v.is_empty() => Ok(v),
				_ => Err(format!("{} requires a value", name)),
			}
		};

		match flag {
			"-h" | "--help" => return Ok(Command::Help),
			"-V" | "--version" => return Ok(Command::Version),
			"-w" | "--watch-dir" => parsed.watch_dir = Some(PathBuf::from(value(flag)?)),
			"-r" | "--reporting-method" => parsed.reporting_method = Some(value(flag)?),
			"-l" | "--logging-method" => parsed.logging_method = Some(value(flag)?),
			"--log-level" => parsed.log_level = Some(value(flag)?),
			"-c" | "--config" => parsed.config = Some(PathBuf::from(value(flag)?)),
			"--pid-file" => parsed.pid_file = Some(PathBuf::from(value(flag)?)),
			"-d" | "--daemonize" => {
				if inline.is_some() {
					return Err(format!("{} takes no value", flag));
				}
				parsed.daemonize = true;
			}
			other => return Err(format!("unknown argument: {}", other)),
		}
	}

	Ok(Command::Run(parsed))
}

/// Arguments for the detached copy of ourselves.
pub fn without_daemonize(args: &[String]) -> Vec<String> {
	args.iter()
		.filter(|a| {
			let flag = a.split_once('=').map_or(a.as_str(), |(f, _)| f);
			flag != "--daemonize" && flag != "-d"
		})
		.cloned()
		.collect()
}
