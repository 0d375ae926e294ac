mod args;
mod config;
mod daemon;
mod logging;
mod paths;

use std::future::Future;

use owo_colors::OwoColorize;
use shepherd_core::{reporting, ReportingManager, Supervisor};
use tokio::signal::unix::{signal, SignalKind};

use args::{CliArgs, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	let raw: Vec<String> = std::env::args().skip(1).collect();

	let cli = match args::parse(&raw) {
		Ok(Command::Run(cli)) => cli,
		Ok(Command::Help) => {
			print_usage();
			return;
		}
		Ok(Command::Version) => {
			println!("shepherd {}", env!("CARGO_PKG_VERSION"));
			return;
		}
		Err(e) => fail(&e),
	};

	if let Err(e) = run(cli, &raw).await {
		fail(&e);
	}
}

fn fail(message: &str) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	eprintln!("run 'shepherd --help' for usage");
	std::process::exit(1);
}

async fn run(cli: CliArgs, raw: &[String]) -> Result<(), String> {
	let file = config::load(cli.config.as_deref())?;
	let settings = config::resolve(file, &cli)?;
	logging::parse_target(&settings.logging_method)?;
	logging::parse_level(&settings.log_level)?;
	let (reporter, period) = reporting::configure(&settings.supervisor.reporting_method).map_err(|e| e.to_string())?;

	if cli.daemonize {
		let pid = daemon::start_background_with_args(&args::without_daemonize(raw))?;
		println!("{}", pid);
		return Ok(());
	}

	logging::init(&settings.logging_method, &settings.log_level)?;

	let reporting = ReportingManager::new(reporter, period.unwrap_or(settings.supervisor.reporting_period()));

	let shutdown = shutdown_signal()?;
	daemon::write_pid_file(&settings.pid_file)?;
	tracing::info!("shepherd {} started (pid {})", env!("CARGO_PKG_VERSION"), std::process::id());

	let mut supervisor = Supervisor::new(settings.supervisor, reporting);
	supervisor.run(shutdown).await;

	daemon::remove_pid_file(&settings.pid_file);
	tracing::info!("shepherd stopped");
	Ok(())
}

/// Handlers are installed before the first tick so an early signal is not fatal.
fn shutdown_signal() -> Result<impl Future<Output = ()>, String> {
	let mut interrupt = signal(SignalKind::interrupt()).map_err(|e| format!("cannot listen for SIGINT: {}", e))?;
	let mut terminate = signal(SignalKind::terminate()).map_err(|e| format!("cannot listen for SIGTERM: {}", e))?;

	Ok(async move {
		tokio::select! {
			_ = interrupt.recv() => tracing::info!("received SIGINT"),
			_ = terminate.recv() => tracing::info!("received SIGTERM"),
		}
	})
}

fn print_usage() {
	eprintln!("{} {} - keep every executable in a directory running", "shepherd".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} --watch-dir <DIR> [options]", "shepherd".bold());
	eprintln!();

	eprintln!("{}", "supervision".cyan().bold());
	eprintln!("  {} <DIR>          Directory of executables to keep running", "-w, --watch-dir".bold());
	eprintln!("  {} <FILE>            TOML config (default {})", "-c, --config".bold(), paths::config_path().display());
	eprintln!("  {} <FILE>              Pid file (default {})", "--pid-file".bold(), paths::pid_path().display());
	eprintln!("  {}               Start in the background and print the pid", "-d, --daemonize".bold());
	eprintln!();

	eprintln!("{}", "reporting".cyan().bold());
	eprintln!("  {} <M>     null (default) or jsondoc:<reports-dir>[:<period-secs>]", "-r, --reporting-method".bold());
	eprintln!();

	eprintln!("{}", "logging".cyan().bold());
	eprintln!("  {} <M>       stderr (default), stdout, file:<path> or null", "-l, --logging-method".bold());
	eprintln!("  {} <L>            error, warn, info (default), debug or trace", "--log-level".bold());
	eprintln!();

	eprintln!("  {}               Show version", "-V, --version".bold());
	eprintln!("  {}                  Show this help", "-h, --help".bold());
}
