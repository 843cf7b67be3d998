use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;

/// File name of the calculator plugin executable.
pub const CALCULATOR_PLUGIN_BINARY: &str = "tether-plugin-calculator";

/// Environment variable through which the host passes its log filter to the
/// plugin it launches.
pub const PLUGIN_LOG_FILTER_ENV: &str = "TETHER_PLUGIN_LOG_FILTER";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Time a plugin has to print its handshake line.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a plugin has to exit after a termination request before it is
/// forcibly killed.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of additions the host runs in its throughput demonstration.
pub const DEFAULT_ITERATIONS: u32 = 1000;

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default plugin path: the calculator binary installed next to
/// the running executable, falling back to a bare name resolved via `PATH`.
#[must_use]
pub fn default_plugin_path() -> Utf8PathBuf {
    let sibling = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(plugin_file_name())))
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok());
    sibling.unwrap_or_else(|| Utf8PathBuf::from(CALCULATOR_PLUGIN_BINARY))
}

fn plugin_file_name() -> String {
    format!("{CALCULATOR_PLUGIN_BINARY}{}", env::consts::EXE_SUFFIX)
}
