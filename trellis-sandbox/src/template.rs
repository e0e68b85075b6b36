//! Parameter templating over `{{ expr }}` placeholders.
//!
//! A string consisting of exactly one placeholder is replaced by the
//! evaluated value with its type preserved; any other placeholder is
//! interpolated as a string. Rendering a parameter tree walks the JSON
//! structure and renders every string leaf.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::error::{SandboxError, SandboxResult};
use crate::eval::{stringify, Evaluator, Limits, Scope};
use crate::parser::parse_expression;

/// Rendering options. Loops and functions exist as switches for parity with
/// the engine configuration surface, but only `false` is accepted.
#[derive(Debug, Clone, Copy)]
pub struct TemplateOptions {
    pub strict: bool,
    pub enable_loops: bool,
    pub enable_functions: bool,
    pub render_timeout: Duration,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            strict: true,
            enable_loops: false,
            enable_functions: false,
            render_timeout: Duration::from_millis(2000),
        }
    }
}

impl TemplateOptions {
    /// Loops and functions cannot be enabled; reject misconfiguration early.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.enable_loops {
            return Err(SandboxError::Parse(
                "loops are not supported by the template sandbox".into(),
            ));
        }
        if self.enable_functions {
            return Err(SandboxError::Parse(
                "functions are not supported by the template sandbox".into(),
            ));
        }
        Ok(())
    }
}

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render a single template string against the scope.
pub fn render_str(template: &str, scope: &Scope, options: &TemplateOptions) -> SandboxResult<String> {
    options.validate()?;
    let deadline = Instant::now() + options.render_timeout;
    match render_fragment(template, scope, options, deadline)? {
        Rendered::Verbatim(s) => Ok(s),
        Rendered::Whole(value) => Ok(stringify(&value)),
    }
}

/// Render every string leaf in a parameter tree, preserving the types of
/// whole-placeholder substitutions.
pub fn render_value(tree: &Value, scope: &Scope, options: &TemplateOptions) -> SandboxResult<Value> {
    options.validate()?;
    let deadline = Instant::now() + options.render_timeout;
    render_node(tree, scope, options, deadline)
}

/// Render a parameter map (the common case for node parameters).
pub fn render_parameters(
    parameters: &Map<String, Value>,
    scope: &Scope,
    options: &TemplateOptions,
) -> SandboxResult<Map<String, Value>> {
    match render_value(&Value::Object(parameters.clone()), scope, options)? {
        Value::Object(map) => Ok(map),
        _ => unreachable!("object in, object out"),
    }
}

enum Rendered {
    /// Interpolated string result
    Verbatim(String),
    /// The string was a single placeholder; the value keeps its type
    Whole(Value),
}

fn render_node(
    value: &Value,
    scope: &Scope,
    options: &TemplateOptions,
    deadline: Instant,
) -> SandboxResult<Value> {
    if Instant::now() >= deadline {
        return Err(SandboxError::Timeout);
    }
    match value {
        Value::String(s) => Ok(match render_fragment(s, scope, options, deadline)? {
            Rendered::Verbatim(s) => Value::String(s),
            Rendered::Whole(v) => v,
        }),
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(render_node(item, scope, options, deadline)?);
            }
            Ok(Value::Array(rendered))
        }
        Value::Object(map) => {
            let mut rendered = Map::new();
            for (key, item) in map {
                rendered.insert(key.clone(), render_node(item, scope, options, deadline)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

fn render_fragment(
    template: &str,
    scope: &Scope,
    options: &TemplateOptions,
    deadline: Instant,
) -> SandboxResult<Rendered> {
    if template.contains("{%") {
        return Err(SandboxError::Parse(
            "template blocks are disabled in the sandbox".into(),
        ));
    }
    if !template.contains(OPEN) {
        return Ok(Rendered::Verbatim(template.to_string()));
    }

    // Whole-placeholder strings keep the evaluated value's type.
    let trimmed = template.trim();
    if trimmed.starts_with(OPEN) && trimmed.ends_with(CLOSE) {
        let inner = &trimmed[OPEN.len()..trimmed.len() - CLOSE.len()];
        if !inner.contains(CLOSE) {
            return Ok(Rendered::Whole(eval_placeholder(
                inner, scope, options, deadline,
            )?));
        }
    }

    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| {
            SandboxError::Parse("unterminated '{{' placeholder".into())
        })?;
        let value = eval_placeholder(&after_open[..end], scope, options, deadline)?;
        out.push_str(&stringify(&value));
        rest = &after_open[end + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(Rendered::Verbatim(out))
}

fn eval_placeholder(
    expression: &str,
    scope: &Scope,
    options: &TemplateOptions,
    deadline: Instant,
) -> SandboxResult<Value> {
    let parsed = parse_expression(expression)?;
    Evaluator::new(scope, Limits::with_deadline(deadline), options.strict).eval(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Scope {
        Scope::new(
            json!({"id": "abc", "count": 2}),
            json!({"data": {"fetch": {"total": 41}}}),
            json!({"prefix": "run"}),
        )
    }

    #[test]
    fn interpolates_into_strings() {
        let out = render_str("{{vars.prefix}}-{{trigger.id}}", &scope(), &TemplateOptions::default())
            .unwrap();
        assert_eq!(out, "run-abc");
    }

    #[test]
    fn whole_placeholder_preserves_type() {
        let rendered = render_value(
            &json!({"n": "{{context.data.fetch.total + 1}}", "s": "v{{trigger.count}}"}),
            &scope(),
            &TemplateOptions::default(),
        )
        .unwrap();
        assert_eq!(rendered, json!({"n": 42, "s": "v2"}));
    }

    #[test]
    fn renders_nested_trees() {
        let rendered = render_value(
            &json!({"a": [{"b": "{{trigger.id}}"}, "plain"], "c": 7}),
            &scope(),
            &TemplateOptions::default(),
        )
        .unwrap();
        assert_eq!(rendered, json!({"a": [{"b": "abc"}, "plain"], "c": 7}));
    }

    #[test]
    fn strict_mode_raises_on_missing_names() {
        let err = render_str("{{trigger.missing}}", &scope(), &TemplateOptions::default())
            .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));

        let lax = TemplateOptions {
            strict: false,
            ..TemplateOptions::default()
        };
        assert_eq!(render_str("{{trigger.missing}}", &scope(), &lax).unwrap(), "");
    }

    #[test]
    fn rejects_disallowed_constructs() {
        let opts = TemplateOptions::default();
        assert!(matches!(
            render_str("{% for x in items %}", &scope(), &opts),
            Err(SandboxError::Parse(_))
        ));
        assert!(matches!(
            render_str("{{foo(1)}}", &scope(), &opts),
            Err(SandboxError::Parse(_))
        ));
        assert!(matches!(
            render_str("{{trigger.id", &scope(), &opts),
            Err(SandboxError::Parse(_))
        ));
    }

    #[test]
    fn misconfigured_options_are_rejected() {
        let opts = TemplateOptions {
            enable_loops: true,
            ..TemplateOptions::default()
        };
        assert!(matches!(
            render_str("plain", &scope(), &opts),
            Err(SandboxError::Parse(_))
        ));
    }
}
