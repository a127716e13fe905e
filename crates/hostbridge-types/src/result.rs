//! Handler result shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `{ success, message?, ...fields }` object a handler produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Operation-specific fields, flattened into the object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OperationResult {
    /// A successful result with a message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            fields: Map::new(),
        }
    }

    /// A successful result with no message.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Add an operation-specific field. `success` and `message` are reserved
    /// and ignored here.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "success" && key != "message" {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Convert to a JSON object.
    pub fn into_value(self) -> Value {
        let mut object = self.fields;
        object.insert("success".to_string(), Value::Bool(self.success));
        if let Some(message) = self.message {
            object.insert("message".to_string(), Value::String(message));
        }
        Value::Object(object)
    }
}

impl From<OperationResult> for Value {
    fn from(result: OperationResult) -> Self {
        result.into_value()
    }
}
