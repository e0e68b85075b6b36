//! Sandboxed evaluation of parsed expressions.
//!
//! Evaluation walks the AST over a read-only `Scope` and enforces the
//! sandbox limits on every step: a step budget, a depth bound, a wall-clock
//! deadline and a cap on produced string bytes. Equal inputs always produce
//! equal outputs.

use std::time::Instant;

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{SandboxError, SandboxResult};

/// The read-only model expressions evaluate against.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub trigger: Value,
    pub context: Value,
    pub vars: Value,
}

impl Scope {
    pub fn new(trigger: Value, context: Value, vars: Value) -> Self {
        Self {
            trigger,
            context,
            vars,
        }
    }

    fn root(&self, name: &str) -> Option<&Value> {
        match name {
            "trigger" => Some(&self.trigger),
            "context" => Some(&self.context),
            "vars" => Some(&self.vars),
            _ => None,
        }
    }
}

/// Hard limits applied during evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Wall-clock deadline; `None` disables the check.
    pub deadline: Option<Instant>,
    /// Maximum evaluation steps (AST nodes visited).
    pub max_steps: u32,
    /// Maximum expression nesting depth.
    pub max_depth: u32,
    /// Cap on bytes of string data produced by concatenation.
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            deadline: None,
            max_steps: 500,
            max_depth: 10,
            max_output_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Limits {
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::default()
        }
    }
}

/// Truthiness in the dialect: `false`, `null`, `0` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Expression evaluator over a scope.
pub struct Evaluator<'a> {
    scope: &'a Scope,
    limits: Limits,
    strict: bool,
    steps: u32,
    produced_bytes: usize,
}

impl<'a> Evaluator<'a> {
    /// Strict mode raises on missing names; non-strict resolves them to null.
    pub fn new(scope: &'a Scope, limits: Limits, strict: bool) -> Self {
        Self {
            scope,
            limits,
            strict,
            steps: 0,
            produced_bytes: 0,
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> SandboxResult<Value> {
        self.eval_at(expr, 0)
    }

    fn step(&mut self) -> SandboxResult<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(SandboxError::Limit(format!(
                "step budget of {} exceeded",
                self.limits.max_steps
            )));
        }
        if let Some(deadline) = self.limits.deadline {
            if Instant::now() >= deadline {
                return Err(SandboxError::Timeout);
            }
        }
        Ok(())
    }

    fn eval_at(&mut self, expr: &Expr, depth: u32) -> SandboxResult<Value> {
        self.step()?;
        if depth > self.limits.max_depth {
            return Err(SandboxError::Limit(format!(
                "expression depth of {} exceeded",
                self.limits.max_depth
            )));
        }
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Ident(name) => match self.scope.root(name) {
                Some(v) => Ok(v.clone()),
                None if self.strict => {
                    Err(SandboxError::Runtime(format!("unknown name '{}'", name)))
                }
                None => Ok(Value::Null),
            },
            Expr::Property(base, name) => {
                let base = self.eval_at(base, depth + 1)?;
                self.member(&base, &Value::String(name.clone()))
            }
            Expr::Index(base, index) => {
                let base = self.eval_at(base, depth + 1)?;
                let index = self.eval_at(index, depth + 1)?;
                self.member(&base, &index)
            }
            Expr::Unary(op, inner) => {
                let value = self.eval_at(inner, depth + 1)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                    UnaryOp::Neg => {
                        let n = to_number(&value).ok_or_else(|| {
                            SandboxError::Runtime(format!("cannot negate {}", kind_of(&value)))
                        })?;
                        number_value(-n)
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, depth),
            Expr::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval_at(cond, depth + 1)?;
                if is_truthy(&cond) {
                    self.eval_at(then_branch, depth + 1)
                } else {
                    self.eval_at(else_branch, depth + 1)
                }
            }
        }
    }

    fn member(&mut self, base: &Value, key: &Value) -> SandboxResult<Value> {
        let resolved = match (base, key) {
            (Value::Object(map), Value::String(name)) => map.get(name).cloned(),
            (Value::Array(items), Value::Number(n)) => n
                .as_u64()
                .and_then(|i| items.get(i as usize))
                .cloned(),
            _ => None,
        };
        match resolved {
            Some(v) => Ok(v),
            None if self.strict => Err(SandboxError::Runtime(format!(
                "missing member '{}' on {}",
                key_display(key),
                kind_of(base)
            ))),
            None => Ok(Value::Null),
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, depth: u32) -> SandboxResult<Value> {
        // Short-circuit forms first
        match op {
            BinaryOp::And => {
                let left = self.eval_at(lhs, depth + 1)?;
                if !is_truthy(&left) {
                    return Ok(Value::Bool(false));
                }
                let right = self.eval_at(rhs, depth + 1)?;
                return Ok(Value::Bool(is_truthy(&right)));
            }
            BinaryOp::Or => {
                let left = self.eval_at(lhs, depth + 1)?;
                if is_truthy(&left) {
                    return Ok(Value::Bool(true));
                }
                let right = self.eval_at(rhs, depth + 1)?;
                return Ok(Value::Bool(is_truthy(&right)));
            }
            _ => {}
        }

        let left = self.eval_at(lhs, depth + 1)?;
        let right = self.eval_at(rhs, depth + 1)?;
        match op {
            BinaryOp::Add => {
                if left.is_string() || right.is_string() {
                    let joined = format!("{}{}", stringify(&left), stringify(&right));
                    self.produced_bytes += joined.len();
                    if self.produced_bytes > self.limits.max_output_bytes {
                        return Err(SandboxError::Limit(format!(
                            "output budget of {} bytes exceeded",
                            self.limits.max_output_bytes
                        )));
                    }
                    Ok(Value::String(joined))
                } else {
                    self.arithmetic(op, &left, &right)
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.arithmetic(op, &left, &right)
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Ok(Value::Bool(compare(op, &left, &right)))
            }
            BinaryOp::EqStrict => Ok(Value::Bool(strict_eq(&left, &right))),
            BinaryOp::NeStrict => Ok(Value::Bool(!strict_eq(&left, &right))),
            BinaryOp::EqLoose => Ok(Value::Bool(loose_eq(&left, &right))),
            BinaryOp::NeLoose => Ok(Value::Bool(!loose_eq(&left, &right))),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn arithmetic(&mut self, op: BinaryOp, left: &Value, right: &Value) -> SandboxResult<Value> {
        // Integer arithmetic stays integral where both operands are integers
        if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Mod if b != 0 => a.checked_rem(b),
                BinaryOp::Mod => {
                    return Err(SandboxError::Runtime("modulo by zero".into()));
                }
                BinaryOp::Div => {
                    let a = a as f64;
                    let b = b as f64;
                    return number_value(a / b);
                }
                _ => unreachable!(),
            };
            return match result {
                Some(n) => Ok(Value::Number(n.into())),
                None => Err(SandboxError::Runtime("integer overflow".into())),
            };
        }

        let a = to_number(left).ok_or_else(|| {
            SandboxError::Runtime(format!("cannot use {} in arithmetic", kind_of(left)))
        })?;
        let b = to_number(right).ok_or_else(|| {
            SandboxError::Runtime(format!("cannot use {} in arithmetic", kind_of(right)))
        })?;
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            _ => unreachable!(),
        };
        number_value(result)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn key_display(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric coercion: null is 0, booleans are 0/1, numeric strings parse.
/// Arrays and objects do not coerce.
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Render a finite f64 back to a JSON number, integral where possible.
fn number_value(n: f64) -> SandboxResult<Value> {
    if !n.is_finite() {
        return Err(SandboxError::Runtime("result is not a finite number".into()));
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::Number((n as i64).into()));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| SandboxError::Runtime("result is not a finite number".into()))
}

/// Stringification used by concatenation and template interpolation.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    // Prefer numeric ordering; fall back to lexicographic for string pairs.
    // Incomparable operands order as false, like NaN comparisons.
    let ordering = match (to_number(left), to_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match ordering {
        Some(ord) => match op {
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::Le => ord.is_le(),
            BinaryOp::Gt => ord.is_gt(),
            BinaryOp::Ge => ord.is_ge(),
            _ => false,
        },
        None => false,
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => left == right,
        (Value::Array(_), _) | (_, Value::Array(_)) => left == right,
        (Value::Object(_), _) | (_, Value::Object(_)) => left == right,
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new(
            json!({"id": "abc", "count": 2, "nested": {"flag": true}}),
            json!({"data": {"check-status": {"status": "approved"}}}),
            json!({"region": "eu"}),
        )
    }

    fn eval(expr: &str) -> SandboxResult<Value> {
        let scope = scope();
        let parsed = parse_expression(expr)?;
        Evaluator::new(&scope, Limits::default(), false).eval(&parsed)
    }

    fn eval_strict(expr: &str) -> SandboxResult<Value> {
        let scope = scope();
        let parsed = parse_expression(expr)?;
        Evaluator::new(&scope, Limits::default(), true).eval(&parsed)
    }

    #[test]
    fn resolves_scope_paths() {
        assert_eq!(eval("trigger.id").unwrap(), json!("abc"));
        assert_eq!(
            eval("context.data['check-status'].status").unwrap(),
            json!("approved")
        );
        assert_eq!(eval("vars.region").unwrap(), json!("eu"));
    }

    #[test]
    fn strict_equality_does_not_coerce() {
        assert_eq!(
            eval("context.data['check-status'].status === 'approved'").unwrap(),
            json!(true)
        );
        assert_eq!(eval("trigger.count === '2'").unwrap(), json!(false));
        assert_eq!(eval("trigger.count == '2'").unwrap(), json!(true));
    }

    #[test]
    fn missing_names_null_out_unless_strict() {
        assert_eq!(eval("trigger.absent").unwrap(), json!(null));
        assert_eq!(eval("context.data['nope'].status").unwrap(), json!(null));
        assert!(matches!(
            eval_strict("trigger.absent"),
            Err(SandboxError::Runtime(_))
        ));
        assert!(matches!(
            eval_strict("unknown_root"),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(eval("trigger.count + 1").unwrap(), json!(3));
        assert_eq!(eval("trigger.count / 4").unwrap(), json!(0.5));
        assert_eq!(eval("'id-' + trigger.id").unwrap(), json!("id-abc"));
        assert_eq!(eval("trigger.count + null").unwrap(), json!(2));
        assert!(matches!(
            eval("trigger.nested + 1"),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn comparisons_are_permissive() {
        assert_eq!(eval("trigger.count > 1").unwrap(), json!(true));
        assert_eq!(eval("trigger.absent > 1").unwrap(), json!(false));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), json!(true));
    }

    #[test]
    fn conditionals_and_logic() {
        assert_eq!(
            eval("trigger.count > 1 ? 'big' : 'small'").unwrap(),
            json!("big")
        );
        assert_eq!(eval("trigger.nested.flag && trigger.count > 0").unwrap(), json!(true));
        assert_eq!(eval("trigger.absent || vars.region == 'eu'").unwrap(), json!(true));
    }

    #[test]
    fn step_budget_is_enforced() {
        let scope = scope();
        let parsed = parse_expression("trigger.count + 1").unwrap();
        let limits = Limits {
            max_steps: 2,
            ..Limits::default()
        };
        let err = Evaluator::new(&scope, limits, false).eval(&parsed).unwrap_err();
        assert!(matches!(err, SandboxError::Limit(_)));
    }

    #[test]
    fn deadline_is_enforced() {
        let scope = scope();
        let parsed = parse_expression("trigger.count + 1").unwrap();
        let limits = Limits::with_deadline(Instant::now() - std::time::Duration::from_millis(1));
        let err = Evaluator::new(&scope, limits, false).eval(&parsed).unwrap_err();
        assert_eq!(err, SandboxError::Timeout);
    }
}
