//! Edge condition evaluation.
//!
//! Conditions never abort a run: empty conditions are true, and any parse,
//! runtime or limit failure yields false with the reason carried alongside
//! so the caller can log it. Conditions always evaluate non-strict, so a
//! reference into a branch that never ran resolves to null rather than
//! erroring.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::SandboxResult;
use crate::eval::{is_truthy, Evaluator, Limits, Scope};
use crate::parser::parse_expression;

/// Outcome of a condition evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub value: bool,
    /// The failure that forced the value to false, if any.
    pub failure: Option<String>,
}

impl EvalOutcome {
    fn ok(value: bool) -> Self {
        Self {
            value,
            failure: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            value: false,
            failure: Some(reason),
        }
    }
}

/// Evaluate a condition over the scope. Deterministic for equal inputs.
pub fn evaluate_condition(condition: &str, scope: &Scope, timeout: Duration) -> EvalOutcome {
    if condition.trim().is_empty() {
        return EvalOutcome::ok(true);
    }
    let parsed = match parse_expression(condition) {
        Ok(parsed) => parsed,
        Err(e) => return EvalOutcome::failed(e.to_string()),
    };
    let limits = Limits::with_deadline(Instant::now() + timeout);
    match Evaluator::new(scope, limits, false).eval(&parsed) {
        Ok(value) => EvalOutcome::ok(is_truthy(&value)),
        Err(e) => EvalOutcome::failed(e.to_string()),
    }
}

/// Publish-time syntactic check: parse the condition and evaluate it against
/// an empty scope. A runtime error there is a hard error; evaluating to
/// false is fine.
pub fn check_condition(condition: &str) -> SandboxResult<()> {
    if condition.trim().is_empty() {
        return Ok(());
    }
    let parsed = parse_expression(condition)?;
    let scope = Scope::new(Value::Null, Value::Null, Value::Null);
    let limits = Limits::with_deadline(Instant::now() + Duration::from_millis(2000));
    Evaluator::new(&scope, limits, false).eval(&parsed).map(|_| ())
}
