//! Output format of the host's log events.
//!
//! The host reads `log_format` from its layered configuration. Plugins
//! always log JSON to stderr so the host can relay their events line by line.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How `tether-host` renders its log events on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, with fields flattened.
    #[default]
    Json,
    /// One terse line per event, for reading in a terminal.
    Compact,
}

/// Error returned when `--log-format` or `TETHER_LOG_FORMAT` names an
/// unknown format.
pub type LogFormatParseError = strum::ParseError;
