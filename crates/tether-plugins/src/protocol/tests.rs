//! Unit tests for call envelopes and line framing.

use std::io::Cursor;

use rstest::rstest;
use serde_json::json;

use super::*;

#[rstest]
#[case("calculator.Add", "calculator", "Add")]
#[case("geometry.Area", "geometry", "Area")]
fn method_names_split_into_halves(
    #[case] input: &str,
    #[case] capability: &str,
    #[case] operation: &str,
) {
    let method: MethodName = input.parse().expect("valid method");
    assert_eq!(method.capability(), capability);
    assert_eq!(method.operation(), operation);
    assert_eq!(method.to_string(), input);
}

#[rstest]
#[case::no_separator("calculator")]
#[case::empty_capability(".Add")]
#[case::empty_operation("calculator.")]
#[case::two_separators("calculator.Add.Now")]
#[case::whitespace("calc ulator.Add")]
fn malformed_method_names_are_rejected(#[case] input: &str) {
    assert!(input.parse::<MethodName>().is_err(), "{input} should fail");
}

#[test]
fn request_serialises_method_as_dotted_string() {
    let method = MethodName::new("calculator", "Add").expect("method");
    let request = CallRequest::new(7, method, json!({"a": 10.0, "b": 5.0}));
    let encoded = serde_json::to_value(&request).expect("encode");
    assert_eq!(
        encoded,
        json!({"id": 7, "method": "calculator.Add", "payload": {"a": 10.0, "b": 5.0}})
    );
}

#[test]
fn request_with_invalid_method_fails_to_decode() {
    let result = serde_json::from_str::<CallRequest>(r#"{"id":1,"method":"Add","payload":{}}"#);
    assert!(result.is_err());
}

#[test]
fn ok_response_wire_shape() {
    let response = CallResponse::ok(3, json!({"result": 15.0}));
    let encoded = serde_json::to_value(&response).expect("encode");
    assert_eq!(
        encoded,
        json!({"id": 3, "outcome": {"ok": {"payload": {"result": 15.0}}}})
    );
}

#[test]
fn error_response_wire_shape() {
    let response = CallResponse::error(
        4,
        RemoteError::new(ErrorKind::Computation, "division_by_zero", "division by zero"),
    );
    let encoded = serde_json::to_value(&response).expect("encode");
    assert_eq!(
        encoded,
        json!({
            "id": 4,
            "outcome": {"error": {
                "kind": "computation",
                "code": "division_by_zero",
                "message": "division by zero"
            }}
        })
    );
    let decoded: CallResponse = serde_json::from_value(encoded).expect("decode");
    assert_eq!(decoded, response);
}

#[test]
fn outcome_converts_into_result() {
    let failure = RemoteError::unknown_method("calculator.Modulo");
    assert_eq!(
        CallOutcome::Error(failure.clone()).into_result(),
        Err(failure)
    );
    assert_eq!(
        CallOutcome::Ok { payload: json!(1) }.into_result(),
        Ok(json!(1))
    );
}

#[test]
fn decode_treats_null_as_empty_record() {
    let empty: Empty = decode("empty", Value::Null).expect("decode null");
    assert_eq!(empty, Empty {});
}

#[test]
fn decode_reports_record_name() {
    let error = decode::<Empty>("status request", json!(42)).expect_err("must fail");
    assert!(error.to_string().contains("status request"), "{error}");
    assert_eq!(error.kind(), ErrorKind::InvalidRequest);
}

#[test]
fn read_line_returns_lines_and_eof() {
    let mut reader = Cursor::new(b"first\nsecond".to_vec());
    let mut buffer = Vec::new();

    assert_eq!(read_line(&mut reader, &mut buffer).expect("line"), 6);
    assert_eq!(buffer, b"first\n");
    assert_eq!(read_line(&mut reader, &mut buffer).expect("line"), 6);
    assert_eq!(buffer, b"second");
    assert_eq!(read_line(&mut reader, &mut buffer).expect("eof"), 0);
}

#[test]
fn read_line_rejects_oversized_messages() {
    let mut reader = Cursor::new(vec![b'x'; MAX_LINE_BYTES + 10]);
    let mut buffer = Vec::new();
    let error = read_line(&mut reader, &mut buffer).expect_err("too long");
    assert_eq!(error.kind(), io::ErrorKind::InvalidData);
}

#[test]
fn error_kind_displays_in_snake_case() {
    assert_eq!(ErrorKind::UnknownCapability.to_string(), "unknown_capability");
    assert_eq!(
        "invalid_request".parse::<ErrorKind>().expect("parse"),
        ErrorKind::InvalidRequest
    );
}
