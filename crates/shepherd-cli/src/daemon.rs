use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{setsid, Pid};

/// Re-launches this binary detached from the terminal and returns its pid.
pub fn start_background_with_args(args: &[String]) -> Result<u32, String> {
	let binary = find_current_binary();
	let child = detached(&binary, args)
		.spawn()
		.map_err(|e| format!("failed to start {} in background: {}", binary.display(), e))?;
	Ok(child.id())
}

/// Null stdio and a new session, so no terminal hangup reaches the child.
fn detached(binary: &Path, args: &[String]) -> Command {
	let mut cmd = Command::new(binary);
	cmd.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null());
	// SAFETY: setsid is async-signal-safe and touches no parent state
	unsafe {
		cmd.pre_exec(|| setsid().map(|_| ()).map_err(std::io::Error::from));
	}
	cmd
}

/// Refuses to start over a pid file whose owner is still alive.
pub fn write_pid_file(path: &Path) -> Result<(), String> {
	if let Some(pid) = read_pid_file(path) {
		if pid != std::process::id() && is_alive(pid) {
			return Err(format!(
				"already running (pid {}), remove {} if this is wrong",
				pid,
				path.display()
			));
		}
	}

	if let Some(dir) = path.parent() {
		std::fs::create_dir_all(dir).map_err(|e| format!("failed to create {}: {}", dir.display(), e))?;
	}
	std::fs::write(path, std::process::id().to_string())
		.map_err(|e| format!("failed to write pid file {}: {}", path.display(), e))
}

pub fn remove_pid_file(path: &Path) {
	if read_pid_file(path) == Some(std::process::id()) {
		let _ = std::fs::remove_file(path);
	}
}

fn read_pid_file(path: &Path) -> Option<u32> {
	std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_alive(pid: u32) -> bool {
	// EPERM means it exists but belongs to someone else
	matches!(kill(Pid::from_raw(pid as i32), None), Ok(()) | Err(Errno::EPERM))
}

fn find_current_binary() -> PathBuf {
	std::env::current_exe().unwrap_or_else(|_| PathBuf::from("shepherd"))
}
