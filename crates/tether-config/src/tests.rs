use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::rstest;

use super::*;

#[test]
fn builders_override_defaults() {
    let config = Config::default()
        .with_plugin_path("/opt/tether/plugin")
        .with_iterations(3)
        .with_call_timeout_ms(250);

    assert_eq!(config.plugin_path(), Utf8PathBuf::from("/opt/tether/plugin"));
    assert_eq!(config.iterations(), 3);
    assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
}

#[test]
fn default_plugin_path_names_the_calculator_binary() {
    let path = Config::default().plugin_path();
    let file_name = path.file_name().unwrap_or_default();
    assert!(
        file_name.starts_with(CALCULATOR_PLUGIN_BINARY),
        "unexpected plugin path {path}"
    );
}

#[rstest]
#[case("json", LogFormat::Json)]
#[case("Compact", LogFormat::Compact)]
fn log_format_parses_case_insensitively(#[case] input: &str, #[case] expected: LogFormat) {
    assert_eq!(input.parse::<LogFormat>().expect("parse log format"), expected);
}

#[test]
fn log_format_rejects_unknown_values() {
    assert!("yaml".parse::<LogFormat>().is_err());
}
