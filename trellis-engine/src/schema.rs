//! JSON Schema (draft 2020-12) validation of parameters and outputs.
//!
//! No network fetches: remote `$ref`s are not resolved. Errors come back as
//! `path: message` strings suitable for API responses and attempt records.

use serde_json::{Map, Value};

/// A schema that accepts everything and is not worth evaluating.
pub fn is_trivial_schema(schema: &Value) -> bool {
    match schema {
        Value::Null => true,
        Value::Bool(accept) => *accept,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Validate a JSON value against a schema. `Ok(())` or the full error list.
pub fn validate_json(schema: &Value, instance: &Value) -> Result<(), Vec<String>> {
    if is_trivial_schema(schema) {
        return Ok(());
    }
    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
        .map_err(|e| vec![format!("invalid schema: {}", e)])?;
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a parameter map against a schema.
pub fn validate_parameters(schema: &Value, parameters: &Map<String, Value>) -> Result<(), Vec<String>> {
    validate_json(schema, &Value::Object(parameters.clone()))
}

/// Publish-time validation of declared (unrendered) parameters: template
/// placeholders are opaque strings that satisfy any scalar slot, while
/// missing required properties still fail.
pub fn validate_declared_parameters(
    schema: &Value,
    parameters: &Map<String, Value>,
) -> Result<(), Vec<String>> {
    if is_trivial_schema(schema) {
        return Ok(());
    }
    let instance = Value::Object(parameters.clone());
    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
        .map_err(|e| vec![format!("invalid schema: {}", e)])?;
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .filter(|e| {
            let path = e.instance_path.to_string();
            !points_at_template(&instance, &path)
        })
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn points_at_template(instance: &Value, pointer: &str) -> bool {
    matches!(
        instance.pointer(pointer),
        Some(Value::String(s)) if s.contains("{{")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string"},
                "count": {"type": "integer"}
            },
            "required": ["message"]
        })
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn accepts_conforming_parameters() {
        validate_parameters(&schema(), &map(json!({"message": "hi", "count": 3}))).unwrap();
    }

    #[test]
    fn reports_error_paths() {
        let errors =
            validate_parameters(&schema(), &map(json!({"message": 1, "count": "x"}))).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("/message")));
    }

    #[test]
    fn trivial_schemas_accept_anything() {
        validate_json(&json!({}), &json!({"anything": [1, 2, 3]})).unwrap();
        validate_json(&Value::Null, &json!(42)).unwrap();
        validate_json(&json!(true), &json!("x")).unwrap();
    }

    #[test]
    fn declared_parameters_treat_templates_as_opaque() {
        // A template string in an integer slot passes at publish time
        validate_declared_parameters(
            &schema(),
            &map(json!({"message": "hi", "count": "{{trigger.count}}"})),
        )
        .unwrap();

        // Required properties are still enforced
        let errors =
            validate_declared_parameters(&schema(), &map(json!({"count": 1}))).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("message")));

        // Non-template type mismatches still fail
        assert!(validate_declared_parameters(&schema(), &map(json!({"message": 5}))).is_err());
    }
}
