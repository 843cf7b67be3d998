//! Termination and exit polling against real shell children.

use std::process::{Command, Stdio};

use super::*;

fn spawn(script: &str) -> ProcessHandle {
    let child = Command::new("/bin/sh")
        .args(["-c", script])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn shell");
    ProcessHandle::new(child)
}

#[test]
fn terminate_stops_a_cooperative_process() {
    let handle = spawn("exec sleep 30");
    assert_eq!(handle.terminate(Duration::from_secs(5)), Termination::Terminated);
    assert!(handle.has_exited());
}

#[test]
fn terminate_escalates_when_sigterm_is_ignored() {
    let handle = spawn("trap '' TERM; while :; do sleep 1; done");
    // Give the shell time to install the trap.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(handle.terminate(Duration::from_millis(200)), Termination::Killed);
}

#[test]
fn terminate_twice_is_a_no_op() {
    let handle = spawn("exec sleep 30");
    handle.terminate(Duration::from_secs(5));
    assert_eq!(handle.terminate(Duration::from_secs(5)), Termination::AlreadyExited);
}

#[test]
fn poll_reports_natural_exit_once() {
    let handle = spawn("exit 3");
    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = handle.poll_exit() {
            break status;
        }
        assert!(Instant::now() < deadline, "process did not exit");
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(status.code(), Some(3));
    assert!(handle.poll_exit().is_none());
    assert_eq!(handle.terminate(Duration::from_secs(1)), Termination::AlreadyExited);
}
