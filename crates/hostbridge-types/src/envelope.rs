//! Wire envelope.
//!
//! Every WebSocket text frame carries exactly one envelope:
//!
//! ```text
//! Request:  { "id": "...", "method": "...", "params": { ... } }
//! Response: { "id": "...", "result": { ... } }
//! Error:    { "id": "...", "error": { "type": "...", "message": "...", "details": ... } }
//! ```
//!
//! There is no explicit direction tag on the wire; the direction is implied by
//! which of `error`, `result` or `method` is present. A `result` key counts as
//! present even when its value is `null`, and a frame carrying both `result`
//! and `error` is rejected.
//! Requests with a missing `method` still parse (with an empty method) so the
//! host can answer them with a `validation` error that echoes the id.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{BridgeError, ErrorKind};

/// A request from the orchestrator to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Caller-generated correlation id, echoed verbatim in the reply.
    pub id: String,
    /// Name of the operation to invoke.
    pub method: String,
    /// Operation parameters (always an object on the wire).
    pub params: Value,
}

impl Request {
    /// Create a new request. `Null` params are normalized to an empty object.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: normalize_params(params),
        }
    }
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Id of the request this answers.
    pub id: String,
    /// Operation result.
    pub result: Value,
}

/// The error object carried by a [`Failure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Failure kind.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<BridgeError> for WireError {
    fn from(err: BridgeError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
            details: err.details,
        }
    }
}

impl From<WireError> for BridgeError {
    fn from(err: WireError) -> Self {
        Self {
            kind: err.kind,
            message: err.message,
            details: err.details,
        }
    }
}

/// A failed reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    /// Id of the request this answers.
    pub id: String,
    /// The error.
    pub error: WireError,
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawEnvelope")]
pub enum Envelope {
    /// Orchestrator -> host call.
    Request(Request),
    /// Host -> orchestrator success.
    Response(Response),
    /// Host -> orchestrator failure.
    Error(Failure),
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Request(Request::new(id, method, params))
    }

    /// Build a success envelope.
    pub fn response(id: impl Into<String>, result: Value) -> Self {
        Self::Response(Response {
            id: id.into(),
            result,
        })
    }

    /// Build an error envelope.
    pub fn error(id: impl Into<String>, err: BridgeError) -> Self {
        Self::Error(Failure {
            id: id.into(),
            error: err.into(),
        })
    }

    /// Build a reply from a handler outcome.
    pub fn reply(id: impl Into<String>, outcome: Result<Value, BridgeError>) -> Self {
        match outcome {
            Ok(result) => Self::response(id, result),
            Err(err) => Self::error(id, err),
        }
    }

    /// Correlation id.
    pub fn id(&self) -> &str {
        match self {
            Self::Request(r) => &r.id,
            Self::Response(r) => &r.id,
            Self::Error(f) => &f.id,
        }
    }

    /// Check if this is a request.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Turn a reply into the outcome it carries. Requests are not replies and
    /// convert to a `validation` error.
    pub fn into_outcome(self) -> Result<Value, BridgeError> {
        match self {
            Self::Response(r) => Ok(r.result),
            Self::Error(f) => Err(f.error.into()),
            Self::Request(r) => Err(BridgeError::validation(format!(
                "expected a reply but received request '{}'",
                r.method
            ))),
        }
    }

    /// Parse one frame of text.
    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize to one frame of text.
    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self)
            .map_err(|e| BridgeError::wrap_internal("failed to serialize envelope", e))
    }

    /// Best-effort extraction of the id from text that failed to parse as an
    /// envelope, so the reply can still be correlated.
    pub fn salvage_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        value.get("id").and_then(id_to_string)
    }
}

/// Permissive shape every frame is first read into.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

/// Maps a present key to `Some`, even when its value is `null`; only an
/// absent key falls back to the `None` default.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> Result<Self, String> {
        let id = match raw.id.as_ref() {
            Some(v) => id_to_string(v).ok_or_else(|| "id must be a string or number".to_string())?,
            None => String::new(),
        };

        match (raw.result, raw.error) {
            (Some(_), Some(_)) => {
                return Err("envelope carries both 'result' and 'error'".to_string());
            }
            (None, Some(error)) => return Ok(Self::Error(Failure { id, error })),
            (Some(result), None) => return Ok(Self::Response(Response { id, result })),
            (None, None) => {}
        }
        Ok(Self::Request(Request {
            id,
            method: raw.method.unwrap_or_default(),
            params: normalize_params(raw.params.unwrap_or(Value::Null)),
        }))
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_params(params: Value) -> Value {
    match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let env = Envelope::request("abc", "echo", json!({"x": 1}));
        let json = env.to_json().unwrap();
        assert_eq!(json, r#"{"id":"abc","method":"echo","params":{"x":1}}"#);
    }

    #[test]
    fn test_error_serialization_uses_type_key() {
        let env = Envelope::error("7", BridgeError::validation("unknown method 'nope'"));
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["error"]["type"], "validation");
        assert!(value["error"].get("details").is_none());
    }

    #[test]
    fn test_direction_is_inferred() {
        let env = Envelope::from_json(r#"{"id":"1","result":{"ok":true}}"#).unwrap();
        assert!(matches!(env, Envelope::Response(_)));

        let env = Envelope::from_json(
            r#"{"id":"1","error":{"type":"timeout","message":"too slow"}}"#,
        )
        .unwrap();
        let err = env.into_outcome().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.message, "too slow");

        let env = Envelope::from_json(r#"{"id":"1","method":"echo"}"#).unwrap();
        match env {
            Envelope::Request(r) => {
                assert_eq!(r.method, "echo");
                assert_eq!(r.params, json!({}));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_null_result_is_a_response() {
        let json = Envelope::response("req-1", Value::Null).to_json().unwrap();
        assert_eq!(json, r#"{"id":"req-1","result":null}"#);

        let env = Envelope::from_json(&json).unwrap();
        assert_eq!(env, Envelope::response("req-1", Value::Null));
        assert_eq!(env.into_outcome().unwrap(), Value::Null);
    }

    #[test]
    fn test_result_and_error_together_are_rejected() {
        let err = Envelope::from_json(
            r#"{"id":"1","result":{},"error":{"type":"internal","message":"boom"}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("both"));
    }

    #[test]
    fn test_missing_method_still_parses_with_id() {
        let env = Envelope::from_json(r#"{"id":"req-9","params":{}}"#).unwrap();
        assert_eq!(env.id(), "req-9");
        match env {
            Envelope::Request(r) => assert!(r.method.is_empty()),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_numeric_id_is_accepted() {
        let env = Envelope::from_json(r#"{"id":42,"method":"echo","params":{}}"#).unwrap();
        assert_eq!(env.id(), "42");
    }

    #[test]
    fn test_invalid_frames() {
        let err = Envelope::from_json("not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = Envelope::from_json(r#"{"id":{"nested":1},"method":"echo"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_salvage_id() {
        assert_eq!(
            Envelope::salvage_id(r#"{"id":"x","error":"not an object"}"#),
            Some("x".to_string())
        );
        assert_eq!(Envelope::salvage_id("garbage"), None);
    }

    #[test]
    fn test_request_is_not_a_reply() {
        let env = Envelope::request("1", "echo", Value::Null);
        assert!(env.is_request());
        assert_eq!(env.into_outcome().unwrap_err().kind, ErrorKind::Validation);
    }
}
