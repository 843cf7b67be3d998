//! Ownership of the plugin child process.
//!
//! [`ProcessHandle`] owns the [`Child`] and an `exited` flag that flips from
//! `false` to `true` exactly once, either when the handle terminates the
//! child or when a poll observes that it exited on its own. Whoever flips
//! the flag decides how the exit is reported.

#[cfg(all(test, unix))]
mod tests;

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
const STDERR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::plugin_stderr");
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already been reported as exited; nothing was done.
    AlreadyExited,
    /// The process had exited on its own before any signal was sent.
    Exited(ExitStatus),
    /// The process exited within the grace period after SIGTERM.
    Terminated,
    /// The process ignored SIGTERM and was killed.
    Killed,
}

/// Handle to a spawned plugin process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Mutex<Child>,
    pid: u32,
    exited: AtomicBool,
}

impl ProcessHandle {
    /// Takes ownership of a spawned child.
    #[must_use]
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Mutex::new(child),
            pid,
            exited: AtomicBool::new(false),
        }
    }

    /// Operating-system process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns `true` once the exit has been recorded.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Flips the exit flag; `true` only for the call that flipped it.
    fn mark_exited(&self) -> bool {
        !self.exited.swap(true, Ordering::AcqRel)
    }

    fn lock_child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether the process exited on its own.
    ///
    /// Returns the exit status only to the caller that records the exit.
    pub fn poll_exit(&self) -> Option<ExitStatus> {
        if self.has_exited() {
            return None;
        }
        let status = match self.lock_child().try_wait() {
            Ok(status) => status,
            Err(error) => {
                warn!(target: PROCESS_TARGET, pid = self.pid, %error, "failed to poll plugin process");
                None
            }
        }?;
        self.mark_exited().then_some(status)
    }

    /// Terminates the process: SIGTERM, up to `grace` for it to exit, then
    /// SIGKILL. The child is always reaped before this returns.
    pub fn terminate(&self, grace: Duration) -> Termination {
        if !self.mark_exited() {
            return Termination::AlreadyExited;
        }
        let mut child = self.lock_child();
        if let Ok(Some(status)) = child.try_wait() {
            return Termination::Exited(status);
        }

        if request_termination(self.pid) {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(target: PROCESS_TARGET, pid = self.pid, ?status, "plugin exited after SIGTERM");
                        return Termination::Terminated;
                    }
                    Ok(None) => thread::sleep(TERMINATE_POLL_INTERVAL),
                    Err(error) => {
                        warn!(target: PROCESS_TARGET, pid = self.pid, %error, "failed to poll plugin process");
                        break;
                    }
                }
            }
            warn!(
                target: PROCESS_TARGET,
                pid = self.pid,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "plugin ignored SIGTERM, killing"
            );
        }

        if let Err(error) = child.kill() {
            debug!(target: PROCESS_TARGET, pid = self.pid, %error, "kill failed");
        }
        if let Err(error) = child.wait() {
            warn!(target: PROCESS_TARGET, pid = self.pid, %error, "failed to reap plugin process");
        }
        Termination::Killed
    }
}

#[cfg(unix)]
fn request_termination(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(error) => {
            debug!(target: PROCESS_TARGET, pid, %error, "SIGTERM delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_pid: u32) -> bool {
    false
}

/// Relays the plugin's stderr into `tracing` events until it closes.
pub(crate) fn relay_stderr(stderr: ChildStderr, pid: u32) {
    let spawned = thread::Builder::new()
        .name(String::from("tether-plugin-stderr"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(text) => debug!(target: STDERR_TARGET, pid, line = %text, "plugin stderr"),
                    Err(_) => break,
                }
            }
        });
    if let Err(error) = spawned {
        warn!(target: PROCESS_TARGET, pid, %error, "could not relay plugin stderr");
    }
}
