//! Parameter validation against an operation's schema.
//!
//! Supports the structural subset of JSON Schema operations actually use:
//! a top-level `"type": "object"`, `required` field lists, per-property
//! `type` (a single name or a list of names) and `enum`. Unknown keywords
//! are ignored rather than rejected.

use serde_json::{Value, json};

use hostbridge_types::BridgeError;

/// A parameter validation failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterValidationError {
    /// Parameters are not a JSON object.
    #[error("parameters must be an object, got {actual}")]
    NotAnObject {
        /// The actual JSON type.
        actual: &'static str,
    },

    /// A required parameter is missing.
    #[error("missing required parameter '{name}'")]
    MissingRequired {
        /// The parameter name.
        name: String,
    },

    /// A parameter has an invalid type.
    #[error("invalid type for '{name}': expected {expected}, got {actual}")]
    InvalidType {
        /// The parameter name.
        name: String,
        /// The expected type(s).
        expected: String,
        /// The actual type found.
        actual: &'static str,
    },

    /// A parameter value is not one of the allowed values.
    #[error("'{name}' has invalid value {value}: expected one of {allowed}")]
    InvalidValue {
        /// The parameter name.
        name: String,
        /// The rejected value.
        value: String,
        /// The allowed values.
        allowed: String,
    },

    /// Multiple validation errors.
    #[error("parameter validation failed: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ParameterValidationError>),
}

impl ParameterValidationError {
    /// Get the parameter name associated with this error (if single error).
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Self::MissingRequired { name } => Some(name),
            Self::InvalidType { name, .. } => Some(name),
            Self::InvalidValue { name, .. } => Some(name),
            Self::NotAnObject { .. } | Self::Multiple(_) => None,
        }
    }

    fn problems(&self) -> Vec<String> {
        match self {
            Self::Multiple(errors) => errors.iter().map(|e| e.to_string()).collect(),
            other => vec![other.to_string()],
        }
    }
}

impl From<ParameterValidationError> for BridgeError {
    fn from(err: ParameterValidationError) -> Self {
        let problems = err.problems();
        BridgeError::validation(err.to_string()).with_details(json!({ "problems": problems }))
    }
}

/// Validate `params` against `schema`, collecting every problem found.
pub fn validate_params(schema: &Value, params: &Value) -> Result<(), ParameterValidationError> {
    let object = match params {
        Value::Object(map) => map,
        other => {
            return Err(ParameterValidationError::NotAnObject {
                actual: type_name(other),
            });
        }
    };

    let mut errors = Vec::new();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match object.get(name) {
                None | Some(Value::Null) => errors.push(ParameterValidationError::MissingRequired {
                    name: name.to_string(),
                }),
                Some(_) => {}
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let Some(value) = object.get(name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            if let Some(expected) = property.get("type")
                && !matches_type(expected, value)
            {
                errors.push(ParameterValidationError::InvalidType {
                    name: name.clone(),
                    expected: expected_label(expected),
                    actual: type_name(value),
                });
                continue;
            }

            if let Some(allowed) = property.get("enum").and_then(Value::as_array)
                && !allowed.contains(value)
            {
                errors.push(ParameterValidationError::InvalidValue {
                    name: name.clone(),
                    value: value.to_string(),
                    allowed: Value::Array(allowed.clone()).to_string(),
                });
            }
        }
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ParameterValidationError::Multiple(errors)),
    }
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_type_name(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_type_name(name, value)),
        _ => true,
    }
}

fn matches_type_name(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        // Unknown type names are not ours to reject.
        _ => true,
    }
}

fn expected_label(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
