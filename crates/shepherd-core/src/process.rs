//! Process control used by the supervisor loop.
//!
//! The loop only talks to [`ProcessControl`] and [`ManagedProcess`], so a host
//! without POSIX process groups or `poll(2)` can plug in its own implementation
//! without touching the state machine.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{pipe, Pid};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReport {
	Code(i32),
	Signal(i32),
}

impl fmt::Display for ExitReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExitReport::Code(code) => write!(f, "rc={}", code),
			ExitReport::Signal(sig) => write!(f, "signal {}", sig),
		}
	}
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
	Graceful,
	Killed,
}

pub trait ManagedProcess {
	fn pid(&self) -> u32;

	/// Non-blocking exit check; reaps the process once it has exited.
	fn try_exit(&mut self) -> io::Result<Option<ExitReport>>;

	/// Asks the process to stop, waits up to `grace`, then kills it and waits.
	fn terminate(&mut self, grace: Duration) -> io::Result<Termination>;

	/// Reads whatever output is pending, at most `budget` bytes. Never blocks.
	fn read_output(&mut self, budget: usize) -> io::Result<Vec<u8>>;
}

pub trait ProcessControl {
	type Process: ManagedProcess;

	/// Starts `executable` with no arguments, stdout and stderr merged.
	fn spawn(&mut self, executable: &Path) -> io::Result<Self::Process>;

	/// Waits at most `timeout` for any process to have output pending and
	/// returns the positions of the ready ones.
	fn wait_output(&mut self, processes: &[&Self::Process], timeout: Duration) -> io::Result<Vec<usize>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PosixControl;

pub struct PosixProcess {
	child: Child,
	output: File,
}

impl ProcessControl for PosixControl {
	type Process = PosixProcess;

	fn spawn(&mut self, executable: &Path) -> io::Result<PosixProcess> {
		let (read_end, write_end) = pipe()?;
		set_cloexec(&read_end)?;
		set_cloexec(&write_end)?;
		set_nonblocking(&read_end)?;

		let stderr = write_end.try_clone()?;
		let child = Command::new(executable)
			.stdin(Stdio::null())
			.stdout(Stdio::from(write_end))
			.stderr(Stdio::from(stderr))
			// own process group so the whole tree can be signalled
			.process_group(0)
			.spawn()?;

		Ok(PosixProcess {
			child,
			output: File::from(read_end),
		})
	}

	fn wait_output(&mut self, processes: &[&PosixProcess], timeout: Duration) -> io::Result<Vec<usize>> {
		if processes.is_empty() {
			return Ok(Vec::new());
		}

		let mut fds: Vec<PollFd> = processes
			.iter()
			.map(|p| PollFd::new(p.output.as_fd(), PollFlags::POLLIN))
			.collect();
		let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);

		match poll(&mut fds, PollTimeout::from(millis)) {
			Ok(_) => {}
			Err(Errno::EINTR) => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		}

		let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
		Ok(fds
			.iter()
			.enumerate()
			.filter(|(_, fd)| fd.revents().is_some_and(|r| r.intersects(ready)))
			.map(|(i, _)| i)
			.collect())
	}
}

impl ManagedProcess for PosixProcess {
	fn pid(&self) -> u32 {
		self.child.id()
	}

	fn try_exit(&mut self) -> io::Result<Option<ExitReport>> {
		Ok(self.child.try_wait()?.map(exit_report))
	}

	fn terminate(&mut self, grace: Duration) -> io::Result<Termination> {
		if self.child.try_wait()?.is_some() {
			return Ok(Termination::Graceful);
		}

		let pid = Pid::from_raw(self.child.id() as i32);
		signal_group(pid, Signal::SIGTERM);

		let deadline = Instant::now() + grace;
		while Instant::now() < deadline {
			if self.child.try_wait()?.is_some() {
				return Ok(Termination::Graceful);
			}
			std::thread::sleep(EXIT_POLL_INTERVAL);
		}

		signal_group(pid, Signal::SIGKILL);
		self.child.wait()?;
		Ok(Termination::Killed)
	}

	fn read_output(&mut self, budget: usize) -> io::Result<Vec<u8>> {
		let mut buf = vec![0u8; budget];
		match self.output.read(&mut buf) {
			Ok(n) => {
				buf.truncate(n);
				Ok(buf)
			}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
				Ok(Vec::new())
			}
			Err(e) => Err(e),
		}
	}
}

fn exit_report(status: std::process::ExitStatus) -> ExitReport {
	match status.code() {
		Some(code) => ExitReport::Code(code),
		None => ExitReport::Signal(status.signal().unwrap_or(0)),
	}
}

fn signal_group(pid: Pid, signal: Signal) {
	if killpg(pid, signal).is_err() {
		let _ = kill(pid, signal);
	}
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
	fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
	Ok(())
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
	let flags = OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?);
	fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
	Ok(())
}
