//! Host runtime tests.

use std::ffi::OsString;

use tempfile::TempDir;
use tether_config::Config;
use tether_plugins::shutdown::ShutdownTrigger;

use super::*;


/// Hands out a fixed configuration regardless of arguments.
struct FixedLoader(Config);

impl ConfigLoader for FixedLoader {
    fn load(&self, _args: Vec<OsString>) -> Result<Config, HostError> {
        Ok(self.0.clone())
    }
}

fn run_fixed(config: Config) -> (ExitCode, String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_with(
        [OsString::from("tether-host")],
        &mut stdout,
        &mut stderr,
        &FixedLoader(config),
        &ShutdownTrigger::new(),
    );
    (
        code,
        String::from_utf8(stdout).expect("utf8 stdout"),
        String::from_utf8(stderr).expect("utf8 stderr"),
    )
}

#[test]
fn missing_plugin_fails_with_exit_code_one() {
    let dir = TempDir::new().expect("temp dir");
    let missing = dir.path().join("no-such-plugin");
    let config = Config::default().with_plugin_path(missing.to_string_lossy().into_owned());

    let (code, stdout, stderr) = run_fixed(config);
    assert_eq!(code, ExitCode::FAILURE);
    assert!(stdout.is_empty());
    assert!(stderr.starts_with("plugin failed:"), "{stderr}");
}

#[test]
fn client_config_carries_the_host_settings() {
    let config = Config::default()
        .with_plugin_path("/opt/tether/calculator")
        .with_call_timeout_ms(250);
    let client = client_config(&config);
    let rendered = format!("{client:?}");
    assert!(rendered.contains("/opt/tether/calculator"), "{rendered}");
    assert!(rendered.contains("250ms"), "{rendered}");
    assert!(rendered.contains(PLUGIN_LOG_FILTER_ENV), "{rendered}");
}

#[test]
fn configuration_errors_are_reported() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run_with(
        [
            OsString::from("tether-host"),
            OsString::from("--iterations"),
            OsString::from("many"),
        ],
        &mut stdout,
        &mut stderr,
        &OrthoConfigLoader,
        &ShutdownTrigger::new(),
    );
    assert_eq!(code, ExitCode::FAILURE);
    let message = String::from_utf8(stderr).expect("utf8 stderr");
    assert!(message.starts_with("failed to load configuration"), "{message}");
}
