//! Behaviour-driven tests for the calculator lifecycle.

use std::sync::Arc;
use std::thread;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::*;

// ---------------------------------------------------------------------------
// Test world
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TestWorld {
    calculator: Option<Arc<CalculatorImpl>>,
    outcome: Option<Result<f64, CalculatorError>>,
    concurrent: Vec<Result<f64, CalculatorError>>,
}

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

fn calculator(world: &TestWorld) -> &CalculatorImpl {
    world.calculator.as_deref().expect("calculator created")
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a new calculator")]
fn given_calculator(world: &mut TestWorld) {
    world.calculator = Some(Arc::new(CalculatorImpl::new()));
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("the calculator is initialized")]
fn when_initialized(world: &mut TestWorld) {
    calculator(world).initialize().expect("initialize");
}

#[when("the calculator is shut down")]
fn when_shut_down(world: &mut TestWorld) {
    calculator(world).shutdown().expect("shutdown");
}

#[when("{a} is added to {b}")]
fn when_added(world: &mut TestWorld, a: f64, b: f64) {
    world.outcome = Some(calculator(world).add(a, b));
}

#[when("{a} is multiplied by {b}")]
fn when_multiplied(world: &mut TestWorld, a: f64, b: f64) {
    world.outcome = Some(calculator(world).multiply(a, b));
}

#[when("{a} is divided by {b}")]
fn when_divided(world: &mut TestWorld, a: f64, b: f64) {
    world.outcome = Some(calculator(world).divide(a, b));
}

#[when("{count} threads add concurrently")]
fn when_concurrent(world: &mut TestWorld, count: u32) {
    let shared = world.calculator.clone().expect("calculator created");
    let workers: Vec<_> = (0..count)
        .map(|n| {
            let worker_calculator = Arc::clone(&shared);
            thread::spawn(move || worker_calculator.add(f64::from(n), 1.0))
        })
        .collect();
    world.concurrent = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker"))
        .collect();
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the result is {expected}")]
fn then_result(world: &mut TestWorld, expected: f64) {
    let outcome = world.outcome.as_ref().expect("operation ran");
    let result = outcome.as_ref().expect("expected a result");
    assert_eq!(result.to_bits(), expected.to_bits());
}

#[then("the operation fails with {code}")]
fn then_fails(world: &mut TestWorld, code: String) {
    let outcome = world.outcome.as_ref().expect("operation ran");
    let error = outcome.as_ref().expect_err("expected a failure");
    assert_eq!(error.code(), code.trim_matches('"'));
}

#[then("initializing again fails with {code}")]
fn then_initialize_fails(world: &mut TestWorld, code: String) {
    let error = calculator(world).initialize().expect_err("initialize fails");
    assert_eq!(error.code(), code.trim_matches('"'));
}

#[then("the status is {state}")]
fn then_status(world: &mut TestWorld, state: String) {
    let status = calculator(world).status().expect("status");
    assert_eq!(status.status.to_string(), state.trim_matches('"'));
}

#[then("every concurrent call fails with {code}")]
fn then_all_fail(world: &mut TestWorld, code: String) {
    assert!(!world.concurrent.is_empty());
    for outcome in &world.concurrent {
        let error = outcome.as_ref().expect_err("expected a failure");
        assert_eq!(error.code(), code.trim_matches('"'));
    }
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(path = "tests/features/calculator_lifecycle.feature")]
fn calculator_lifecycle_behaviour(world: TestWorld) {
    let _ = world;
}
