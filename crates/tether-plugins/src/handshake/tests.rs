//! Unit tests for handshake negotiation.

use std::ffi::OsStr;
use std::io::Cursor;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tether_config::Network;

use super::plugin::verify_cookie;
use super::*;
use crate::capability::CALCULATOR_HANDSHAKE;

#[fixture]
fn config() -> HandshakeConfig {
    CALCULATOR_HANDSHAKE
}

fn line(overrides: &serde_json::Value) -> String {
    let mut base = json!({
        "core_protocol_version": 1,
        "protocol_version": 1,
        "cookie": "calculator_example",
        "endpoint": "unix:///tmp/tether/plugin.sock",
        "capabilities": [{"name": "calculator", "contract": "calculator", "version": "1.0"}]
    });
    if let (Some(target), Some(source)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    base.to_string()
}

#[rstest]
fn valid_line_negotiates(config: HandshakeConfig) {
    let negotiated = HandshakeLine::parse(&line(&json!({})), &config).expect("negotiate");
    assert_eq!(negotiated.protocol_version, 1);
    assert_eq!(
        negotiated.endpoint,
        SocketEndpoint::unix("/tmp/tether/plugin.sock")
    );
    let capability = negotiated.capability("calculator").expect("advertised");
    assert_eq!(capability.contract, ContractId::Calculator);
    assert_eq!(capability.version, ContractVersion::new(1, 0));
}

#[rstest]
#[case::one_character_off("calculator_examplf")]
#[case::truncated("calculator_exampl")]
#[case::empty("")]
fn cookie_mismatch_is_rejected_without_echoing_the_secret(
    config: HandshakeConfig,
    #[case] cookie: &str,
) {
    let error = HandshakeLine::parse(&line(&json!({"cookie": cookie})), &config)
        .expect_err("cookie must be rejected");
    assert!(matches!(error, HandshakeError::CookieMismatch { .. }));
    let message = error.to_string();
    assert!(
        !message.contains("calculator_example"),
        "secret leaked into message: {message}"
    );
    assert!(message.contains("CALCULATOR_PLUGIN"), "{message}");
}

#[rstest]
fn version_outside_range_is_rejected(config: HandshakeConfig) {
    let error = HandshakeLine::parse(&line(&json!({"protocol_version": 2})), &config)
        .expect_err("version must be rejected");
    assert!(matches!(
        error,
        HandshakeError::VersionMismatch {
            found: 2,
            min: 1,
            max: 1
        }
    ));
}

#[test]
fn widened_range_accepts_older_versions() {
    let config = HandshakeConfig::new(3, "KEY", "value").with_min_protocol_version(2);
    let raw = line(&json!({"protocol_version": 2, "cookie": "value"}));
    assert_eq!(
        HandshakeLine::parse(&raw, &config)
            .expect("negotiate")
            .protocol_version,
        2
    );
}

#[rstest]
fn core_version_mismatch_is_rejected(config: HandshakeConfig) {
    let error = HandshakeLine::parse(&line(&json!({"core_protocol_version": 9})), &config)
        .expect_err("core version must be rejected");
    assert!(matches!(
        error,
        HandshakeError::CoreVersionMismatch {
            expected: 1,
            found: 9
        }
    ));
}

#[rstest]
#[case::not_json("1|1|unix|/tmp/plugin.sock|grpc")]
#[case::missing_fields(r#"{"protocol_version":1}"#)]
fn malformed_lines_are_rejected(config: HandshakeConfig, #[case] raw: &str) {
    let error = HandshakeLine::parse(raw, &config).expect_err("line must be rejected");
    assert!(matches!(error, HandshakeError::Malformed { .. }));
}

#[rstest]
#[case::bad_scheme("http://127.0.0.1:80")]
#[case::remote_host("tcp://10.1.2.3:4000")]
fn unusable_endpoints_are_rejected(config: HandshakeConfig, #[case] endpoint: &str) {
    let error = HandshakeLine::parse(&line(&json!({"endpoint": endpoint})), &config)
        .expect_err("endpoint must be rejected");
    assert!(matches!(error, HandshakeError::InvalidEndpoint { .. }));
}

#[rstest]
fn negotiate_reads_first_line_from_stream(config: HandshakeConfig) {
    let stream = Cursor::new(format!("{}\ntrailing diagnostics\n", line(&json!({}))));
    let negotiated =
        negotiate(stream, &config, Duration::from_secs(5)).expect("negotiate from stream");
    assert_eq!(negotiated.capabilities.len(), 1);
}

#[rstest]
fn negotiate_reports_closed_stream(config: HandshakeConfig) {
    let error = negotiate(Cursor::new(Vec::new()), &config, Duration::from_secs(5))
        .expect_err("empty stream must fail");
    assert!(matches!(error, HandshakeError::StreamClosed));
}

#[cfg(unix)]
#[rstest]
fn negotiate_times_out_on_silent_stream(config: HandshakeConfig) {
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    let (reader, writer) = UnixStream::pair().expect("socket pair");
    let started = Instant::now();
    let error = negotiate(reader, &config, Duration::from_millis(100))
        .expect_err("silent stream must time out");
    assert!(matches!(error, HandshakeError::Timeout { timeout_ms: 100 }));
    assert!(started.elapsed() < Duration::from_secs(5));
    drop(writer);
}

#[rstest]
fn launch_environment_carries_cookie_and_versions() {
    let config = HandshakeConfig::new(3, "KEY", "value").with_min_protocol_version(1);
    let environment = config.launch_environment();
    assert!(environment.contains(&("KEY".to_owned(), "value".to_owned())));
    assert!(environment.contains(&(PROTOCOL_VERSIONS_ENV.to_owned(), "1,2,3".to_owned())));
}

#[rstest]
fn cookie_verification_requires_exact_value(config: HandshakeConfig) {
    assert!(verify_cookie(&config, Some(OsStr::new("calculator_example"))).is_ok());
    let missing = verify_cookie(&config, None).expect_err("missing cookie");
    assert!(matches!(missing, HandshakeError::NotLaunchedByHost { .. }));
    assert!(missing.to_string().contains("must be launched by its host"));
    assert!(verify_cookie(&config, Some(OsStr::new("calculator_exampl"))).is_err());
}

#[rstest]
#[case::not_offered(None, Ok(3))]
#[case::highest_common(Some("1,2,3,4"), Ok(3))]
#[case::ignores_garbage(Some("x, 2 ,"), Ok(2))]
#[case::none_common(Some("7,8"), Err(()))]
fn protocol_version_selection(#[case] offered: Option<&str>, #[case] expected: Result<u32, ()>) {
    let config = HandshakeConfig::new(3, "KEY", "value").with_min_protocol_version(2);
    let selected = select_protocol_version(&config, offered).map_err(drop);
    assert_eq!(selected, expected);
}

#[rstest]
#[case(Some("tcp"), Network::Tcp)]
#[case(Some(" TCP "), Network::Tcp)]
#[case(None, Network::platform_default())]
#[case(Some(""), Network::platform_default())]
fn requested_network_parses_transport_variable(
    #[case] value: Option<&str>,
    #[case] expected: Network,
) {
    assert_eq!(requested_network(value).expect("network"), expected);
}

#[test]
fn requested_network_rejects_unknown_transport() {
    assert!(matches!(
        requested_network(Some("grpc")),
        Err(HandshakeError::UnsupportedTransport { .. })
    ));
}

#[rstest]
fn announce_writes_a_single_parsable_line(config: HandshakeConfig) {
    let endpoint = SocketEndpoint::tcp("127.0.0.1", 4100);
    let announced = HandshakeLine::new(1, config.magic_cookie_value(), &endpoint, Vec::new());
    let mut output = Vec::new();
    announce(&mut output, &announced).expect("announce");

    let text = String::from_utf8(output).expect("utf8");
    assert!(text.ends_with('\n'));
    assert_eq!(text.matches('\n').count(), 1);
    let negotiated = HandshakeLine::parse(&text, &config).expect("parse announced line");
    assert_eq!(negotiated.endpoint, endpoint);
}
