//! Crate-level integration and BDD tests.

use std::sync::Arc;
use std::sync::RwLock;

use serde_json::json;

use crate::broker::LocalRegistry;
use crate::capability::{
    CALCULATOR_CAPABILITY, Calculator, CalculatorError, CalculatorOperation, CalculatorStub,
    LifecycleState, StatusResponse,
};
use crate::protocol::{CallRequest, ErrorKind};


/// Minimal calculator that follows the lifecycle rules.
#[derive(Default)]
struct LifecycleCalculator {
    state: RwLock<LifecycleState>,
}

impl LifecycleCalculator {
    fn ready(&self) -> Result<(), CalculatorError> {
        match *self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner) {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Uninitialized | LifecycleState::ShutDown => {
                Err(CalculatorError::NotInitialized)
            }
        }
    }
}

#[expect(clippy::float_arithmetic, reason = "test calculator performs arithmetic")]
impl Calculator for LifecycleCalculator {
    fn initialize(&self) -> Result<(), CalculatorError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            LifecycleState::Uninitialized => {
                *state = LifecycleState::Initialized;
                Ok(())
            }
            LifecycleState::Initialized => Err(CalculatorError::AlreadyInitialized),
            LifecycleState::ShutDown => Err(CalculatorError::ShutDown),
        }
    }

    fn add(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.ready().map(|()| a + b)
    }

    fn subtract(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.ready().map(|()| a - b)
    }

    fn multiply(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.ready().map(|()| a * b)
    }

    fn divide(&self, a: f64, b: f64) -> Result<f64, CalculatorError> {
        self.ready()?;
        if b.classify() == std::num::FpCategory::Zero {
            return Err(CalculatorError::DivisionByZero);
        }
        let quotient = a / b;
        if quotient.is_finite() {
            Ok(quotient)
        } else {
            Err(CalculatorError::NonFiniteResult {
                operation: CalculatorOperation::Divide,
            })
        }
    }

    fn status(&self) -> Result<StatusResponse, CalculatorError> {
        let status = *self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(StatusResponse {
            status,
            version: String::from("test"),
            initialized: status == LifecycleState::Initialized,
            message: status.to_string(),
            started_at: None,
        })
    }

    fn shutdown(&self) -> Result<(), CalculatorError> {
        let mut state = self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        match *state {
            LifecycleState::Initialized => {
                *state = LifecycleState::ShutDown;
                Ok(())
            }
            LifecycleState::Uninitialized => Err(CalculatorError::NotInitialized),
            LifecycleState::ShutDown => Err(CalculatorError::ShutDown),
        }
    }
}

fn calculator_registry() -> LocalRegistry {
    let mut registry = LocalRegistry::new();
    registry
        .register_local(
            CALCULATOR_CAPABILITY,
            Arc::new(CalculatorStub::new(LifecycleCalculator::default())),
        )
        .expect("register calculator");
    registry
}

#[test]
fn registry_drives_the_calculator_lifecycle() {
    let registry = calculator_registry();
    let call = |id, method: &str| {
        registry
            .dispatch(CallRequest::new(
                id,
                method.parse().expect("method"),
                json!({"a": 6.0, "b": 3.0}),
            ))
            .outcome
            .into_result()
    };

    let early = call(1, "calculator.Add").expect_err("not initialized");
    assert_eq!(early.kind, ErrorKind::Capability);
    assert_eq!(early.code, "not_initialized");

    call(2, "calculator.Initialize").expect("initialize ignores operands");
    assert_eq!(
        call(3, "calculator.Divide").expect("divide"),
        json!({"result": 2.0})
    );

    call(4, "calculator.Shutdown").expect("shutdown");
    let late = call(5, "calculator.Multiply").expect_err("shut down");
    assert_eq!(late.code, "not_initialized");
    let again = call(6, "calculator.Shutdown").expect_err("terminal");
    assert_eq!(again.code, "shut_down");
}
