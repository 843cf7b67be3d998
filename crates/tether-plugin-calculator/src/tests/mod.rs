//! Unit and behaviour tests for the calculator implementation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;
use tether_plugins::protocol::CallRequest;

use super::*;

mod behaviour;

#[fixture]
fn ready() -> CalculatorImpl {
    let calculator = CalculatorImpl::new();
    calculator.initialize().expect("initialize");
    calculator
}

#[rstest]
#[case::add(CalculatorOperation::Add, 10.0, 5.0, 15.0)]
#[case::subtract(CalculatorOperation::Subtract, 20.0, 8.0, 12.0)]
#[case::multiply(CalculatorOperation::Multiply, 12.0, 8.0, 96.0)]
#[case::divide(CalculatorOperation::Divide, 6.0, 3.0, 2.0)]
#[case::negative(CalculatorOperation::Subtract, 1.0, 3.5, -2.5)]
fn arithmetic_matches_expected(
    ready: CalculatorImpl,
    #[case] operation: CalculatorOperation,
    #[case] a: f64,
    #[case] b: f64,
    #[case] expected: f64,
) {
    let result = match operation {
        CalculatorOperation::Add => ready.add(a, b),
        CalculatorOperation::Subtract => ready.subtract(a, b),
        CalculatorOperation::Multiply => ready.multiply(a, b),
        CalculatorOperation::Divide => ready.divide(a, b),
        other => panic!("not arithmetic: {other}"),
    }
    .expect("result");
    assert_eq!(result.to_bits(), expected.to_bits());
}

#[rstest]
#[case::positive_zero(0.0)]
#[case::negative_zero(-0.0)]
fn division_by_zero_is_rejected(ready: CalculatorImpl, #[case] divisor: f64) {
    let error = ready.divide(10.0, divisor).expect_err("division by zero");
    assert!(matches!(error, CalculatorError::DivisionByZero));
}

#[rstest]
fn overflow_is_reported_as_non_finite(ready: CalculatorImpl) {
    let product = ready.multiply(f64::MAX, 2.0).expect_err("overflow");
    assert!(matches!(
        product,
        CalculatorError::NonFiniteResult {
            operation: CalculatorOperation::Multiply
        }
    ));
    let quotient = ready.divide(f64::MAX, f64::MIN_POSITIVE).expect_err("overflow");
    assert!(matches!(
        quotient,
        CalculatorError::NonFiniteResult {
            operation: CalculatorOperation::Divide
        }
    ));
}

#[test]
fn arithmetic_requires_initialization() {
    let calculator = CalculatorImpl::new();
    assert!(matches!(
        calculator.add(1.0, 2.0),
        Err(CalculatorError::NotInitialized)
    ));
}

#[rstest]
fn lifecycle_transitions_are_enforced(ready: CalculatorImpl) {
    assert!(matches!(
        ready.initialize(),
        Err(CalculatorError::AlreadyInitialized)
    ));
    ready.shutdown().expect("shutdown");
    assert!(matches!(ready.shutdown(), Err(CalculatorError::ShutDown)));
    assert!(matches!(ready.initialize(), Err(CalculatorError::ShutDown)));
    assert!(matches!(
        ready.divide(6.0, 3.0),
        Err(CalculatorError::NotInitialized)
    ));
}

#[test]
fn shutdown_before_initialize_is_rejected() {
    let calculator = CalculatorImpl::new();
    assert!(matches!(
        calculator.shutdown(),
        Err(CalculatorError::NotInitialized)
    ));
}

#[test]
fn status_reports_the_lifecycle() {
    let calculator = CalculatorImpl::new();
    let before = calculator.status().expect("status");
    assert_eq!(before.status, LifecycleState::Uninitialized);
    assert!(!before.initialized);
    assert_eq!(before.version, CALCULATOR_VERSION);
    assert_eq!(before.message, "uninitialized");
    assert!(before.started_at.is_none());

    calculator.initialize().expect("initialize");
    let running = calculator.status().expect("status");
    assert!(running.initialized);
    assert_eq!(running.message, "running for 0s");
    let started_at = running.started_at.expect("start time");
    assert!(OffsetDateTime::parse(&started_at, &Rfc3339).is_ok(), "{started_at}");

    calculator.shutdown().expect("shutdown");
    let after = calculator.status().expect("status");
    assert_eq!(after.status, LifecycleState::ShutDown);
    assert!(!after.initialized);
    assert_eq!(after.message, "shut_down");
}

#[rstest]
#[case::zero(Duration::ZERO, 0)]
#[case::just_below_half(Duration::from_millis(1_499), 1)]
#[case::half_rounds_up(Duration::from_millis(1_500), 2)]
#[case::whole(Duration::from_secs(42), 42)]
fn uptime_rounds_to_the_nearest_second(#[case] uptime: Duration, #[case] expected: u64) {
    assert_eq!(rounded_seconds(uptime), expected);
}

#[rstest]
fn concurrent_additions_each_get_their_result(ready: CalculatorImpl) {
    let calculator = Arc::new(ready);
    let workers: Vec<_> = (0..16_u32)
        .map(|n| {
            let shared = Arc::clone(&calculator);
            thread::spawn(move || {
                let value = f64::from(n);
                (n, shared.add(value, value).expect("add"))
            })
        })
        .collect();
    for worker in workers {
        let (n, sum) = worker.join().expect("worker");
        assert_eq!(sum.to_bits(), f64::from(n * 2).to_bits());
    }
}

#[test]
fn registry_serves_the_calculator() {
    let served = registry().expect("registry");
    let advertised = served.advertised();
    assert_eq!(advertised.len(), 1);
    assert_eq!(
        advertised.first().map(|capability| capability.name.as_str()),
        Some(CALCULATOR_CAPABILITY)
    );

    let response = served.dispatch(CallRequest::new(
        1,
        "calculator.GetStatus".parse().expect("method"),
        json!(null),
    ));
    let payload = response.outcome.into_result().expect("status");
    let status: StatusResponse = serde_json::from_value(payload).expect("status record");
    assert_eq!(status.status, LifecycleState::Uninitialized);
    assert_eq!(status.version, CALCULATOR_VERSION);
}

#[test]
fn not_launched_by_host_explains_itself() {
    let error = PluginMainError::from(ServeError::Handshake(
        tether_plugins::HandshakeError::NotLaunchedByHost {
            key: String::from("CALCULATOR_PLUGIN"),
        },
    ));
    assert!(matches!(error, PluginMainError::NotLaunchedByHost));
    assert!(error.to_string().contains("not meant to be executed directly"));
}
