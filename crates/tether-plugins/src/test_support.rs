//! Fake plugins for supervisor and client tests.
//!
//! A fake is a `/bin/sh` script that prints a handshake line taken from its
//! environment and then behaves as scripted. The endpoint it advertises is a
//! Unix listener owned by the test, which may leave it unanswered or serve
//! scripted responses through [`serve_script`].

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::thread;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use tether_config::SocketEndpoint;

use crate::capability::{CALCULATOR_HANDSHAKE, ContractId};
use crate::handshake::{AdvertisedCapability, HandshakeLine};
use crate::protocol::{CallRequest, CallResponse};
use crate::supervisor::LaunchConfig;

pub(crate) const SHELL: &str = "/bin/sh";
pub(crate) const COOKIE: &str = "calculator_example";

/// Returns `true` once no process with `pid` exists; signal 0 only probes.
pub(crate) fn is_reaped(pid: u32) -> bool {
    let raw = i32::try_from(pid).expect("pid fits");
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None).is_err()
}

pub(crate) struct FakePlugin {
    _dir: TempDir,
    listener: Option<UnixListener>,
    endpoint: SocketEndpoint,
}

impl FakePlugin {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("plugin.sock")).expect("utf8 path");
        let listener = UnixListener::bind(&path).expect("bind listener");
        Self {
            _dir: dir,
            listener: Some(listener),
            endpoint: SocketEndpoint::unix(path),
        }
    }

    pub(crate) const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Hands the listener to a scripted server.
    pub(crate) fn take_listener(&mut self) -> UnixListener {
        self.listener.take().expect("listener not yet taken")
    }

    fn handshake(&self, cookie: &str) -> String {
        let line = HandshakeLine::new(
            1,
            cookie,
            &self.endpoint,
            vec![AdvertisedCapability {
                name: String::from("calculator"),
                contract: ContractId::Calculator,
                version: ContractId::Calculator.version(),
            }],
        );
        serde_json::to_string(&line).expect("encode handshake")
    }

    /// Announces `cookie`, then runs the shell snippet `then`.
    pub(crate) fn config(&self, cookie: &str, then: &str) -> LaunchConfig {
        LaunchConfig::new(SHELL, CALCULATOR_HANDSHAKE)
            .with_args(["-c", &format!("printf '%s\\n' \"$FAKE_HANDSHAKE\"; {then}")])
            .with_env("FAKE_HANDSHAKE", self.handshake(cookie))
            .with_start_timeout(std::time::Duration::from_secs(10))
            .with_kill_timeout(std::time::Duration::from_secs(2))
    }
}

/// Accepts one connection and answers each request with `answer(request)`;
/// `None` leaves the request unanswered.
pub(crate) fn serve_script<F>(listener: UnixListener, answer: F) -> thread::JoinHandle<()>
where
    F: Fn(&CallRequest) -> Option<CallResponse> + Send + 'static,
{
    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut writer = stream.try_clone().expect("clone");
        for read in BufReader::new(stream).lines() {
            let Ok(line) = read else { break };
            let request: CallRequest = serde_json::from_str(&line).expect("request line");
            if let Some(response) = answer(&request) {
                let mut encoded = serde_json::to_vec(&response).expect("encode");
                encoded.push(b'\n');
                if writer.write_all(&encoded).is_err() {
                    break;
                }
            }
        }
    })
}
