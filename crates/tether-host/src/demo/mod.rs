//! Demonstration workload run against a dispensed calculator.


use std::io::Write;
use std::time::Instant;

use tether_plugins::{Calculator, CalculatorError};
use tracing::info;

use crate::errors::HostError;

const DEMO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::demo");

/// Binary arithmetic operations shown by the demonstration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Op {
    const fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Subtract => '-',
            Self::Multiply => '*',
            Self::Divide => '/',
        }
    }

    fn apply(self, calculator: &dyn Calculator, a: f64, b: f64) -> Result<f64, CalculatorError> {
        match self {
            Self::Add => calculator.add(a, b),
            Self::Subtract => calculator.subtract(a, b),
            Self::Multiply => calculator.multiply(a, b),
            Self::Divide => calculator.divide(a, b),
        }
    }
}

const SAMPLES: [(Op, f64, f64); 4] = [
    (Op::Add, 10.0, 5.0),
    (Op::Subtract, 20.0, 8.0),
    (Op::Multiply, 6.0, 7.0),
    (Op::Divide, 84.0, 2.0),
];

/// Initializes the calculator, prints sample results, demonstrates error
/// propagation with a division by zero, reports status, and times
/// `iterations` sequential additions.
///
/// # Errors
///
/// Returns [`HostError::Calculator`] for any unexpected calculator failure
/// and [`HostError::Output`] when `out` cannot be written.
pub fn run<W: Write>(
    calculator: &dyn Calculator,
    iterations: u32,
    out: &mut W,
) -> Result<(), HostError> {
    calculator.initialize()?;
    info!(target: DEMO_TARGET, "calculator initialized");

    for (op, a, b) in SAMPLES {
        let result = op.apply(calculator, a, b)?;
        writeln!(out, "{a} {} {b} = {result}", op.symbol())?;
    }

    match calculator.divide(10.0, 0.0) {
        Err(CalculatorError::DivisionByZero) => {
            writeln!(out, "10 / 0 failed: {}", CalculatorError::DivisionByZero)?;
        }
        Ok(result) => writeln!(out, "10 / 0 = {result}")?,
        Err(other) => return Err(other.into()),
    }

    let status = calculator.status()?;
    writeln!(
        out,
        "status: {} ({}), version {}",
        status.status, status.message, status.version
    )?;

    let started = Instant::now();
    for n in 0..iterations {
        calculator.add(f64::from(n), 1.0)?;
    }
    let elapsed = started.elapsed();
    match elapsed.checked_div(iterations) {
        Some(per_call) => writeln!(
            out,
            "{iterations} additions in {elapsed:?} ({per_call:?} per call)"
        )?,
        None => writeln!(out, "0 additions")?,
    }
    info!(
        target: DEMO_TARGET,
        iterations,
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "benchmark complete"
    );
    Ok(())
}
