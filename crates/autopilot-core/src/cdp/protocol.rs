//! Control-protocol wire types.
//!
//! Each websocket text message carries one JSON frame:
//!
//! ```text
//! request   {"id": 7, "method": "Runtime.evaluate", "params": {...}}
//! response  {"id": 7, "result": {...}}
//! error     {"id": 7, "error": {"code": -32000, "message": "..."}}
//! event     {"method": "Runtime.consoleAPICalled", "params": {...}}
//! ```
//!
//! Frames are validated into [`Frame`] on receipt; anything that fits none of
//! the shapes is a [`AutopilotError::MalformedFrame`].

use crate::{AutopilotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RemoteErrorBody> for AutopilotError {
    fn from(body: RemoteErrorBody) -> Self {
        AutopilotError::RemoteError {
            code: body.code,
            message: body.message,
        }
    }
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request {
        id: u64,
        method: String,
        params: Value,
    },
    Response {
        id: u64,
        result: Value,
    },
    ErrorResponse {
        id: u64,
        error: RemoteErrorBody,
    },
    Event {
        method: String,
        params: Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RemoteErrorBody>,
}

impl Frame {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| AutopilotError::MalformedFrame {
            message: e.to_string(),
        })?;

        match (raw.id, raw.method, raw.error) {
            (Some(id), _, Some(error)) => Ok(Frame::ErrorResponse { id, error }),
            (Some(id), Some(method), None) if raw.result.is_none() => Ok(Frame::Request {
                id,
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (Some(id), _, None) => Ok(Frame::Response {
                id,
                result: raw.result.unwrap_or(Value::Null),
            }),
            (None, Some(method), None) => Ok(Frame::Event {
                method,
                params: raw.params.unwrap_or(Value::Null),
            }),
            (None, _, _) => Err(AutopilotError::MalformedFrame {
                message: "frame has neither id nor method".to_string(),
            }),
        }
    }

    /// The correlation id, for frames that answer a call.
    pub fn response_id(&self) -> Option<u64> {
        match self {
            Frame::Response { id, .. } | Frame::ErrorResponse { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Convert a response frame into the call's outcome.
    pub fn into_outcome(self) -> Option<Result<Value>> {
        match self {
            Frame::Response { result, .. } => Some(Ok(result)),
            Frame::ErrorResponse { error, .. } => Some(Err(error.into())),
            _ => None,
        }
    }
}

/// Parameters for `Runtime.evaluate`.
pub fn evaluate_params(expression: &str) -> Value {
    serde_json::json!({
        "expression": expression,
        "returnByValue": true,
        "awaitPromise": true,
    })
}

/// Extract the returned value from a `Runtime.evaluate` result.
///
/// A thrown exception in the page comes back as a successful response with an
/// `exceptionDetails` member; that is surfaced as `Err(description)`.
pub fn evaluate_outcome(result: &Value) -> std::result::Result<Value, String> {
    if let Some(details) = result.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("Uncaught exception");
        return Err(message.to_string());
    }

    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response() {
        let frame = Frame::parse(r#"{"id":3,"result":{"result":{"value":1}}}"#).unwrap();
        assert_eq!(frame.response_id(), Some(3));
        assert_eq!(
            frame.into_outcome().unwrap().unwrap(),
            json!({"result": {"value": 1}})
        );
    }

    #[test]
    fn test_parse_empty_result_is_response() {
        let frame = Frame::parse(r#"{"id":4}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: 4,
                result: Value::Null
            }
        );
    }

    #[test]
    fn test_parse_error_response() {
        let frame =
            Frame::parse(r#"{"id":5,"error":{"code":-32601,"message":"not found"}}"#).unwrap();
        let err = frame.into_outcome().unwrap().unwrap_err();
        assert!(matches!(
            err,
            AutopilotError::RemoteError { code: Some(-32601), ref message } if message == "not found"
        ));
    }

    #[test]
    fn test_parse_event_has_no_response_id() {
        let frame = Frame::parse(r#"{"method":"Page.loadEventFired","params":{}}"#).unwrap();
        assert!(matches!(frame, Frame::Event { .. }));
        assert_eq!(frame.response_id(), None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            Frame::parse("not json"),
            Err(AutopilotError::MalformedFrame { .. })
        ));
        assert!(matches!(
            Frame::parse(r#"{"result":{}}"#),
            Err(AutopilotError::MalformedFrame { .. })
        ));
        assert!(Frame::parse(r#"{"id":"abc"}"#).is_err());
    }

    #[test]
    fn test_request_serialization() {
        let text = Request::new(9, "Runtime.evaluate", evaluate_params("1+1"))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["params"]["expression"], "1+1");
        assert_eq!(value["params"]["returnByValue"], true);
    }

    #[test]
    fn test_evaluate_outcome_value_and_exception() {
        let ok = json!({"result": {"type": "string", "value": "started"}});
        assert_eq!(evaluate_outcome(&ok).unwrap(), json!("started"));

        let undefined = json!({"result": {"type": "undefined"}});
        assert_eq!(evaluate_outcome(&undefined).unwrap(), Value::Null);

        let thrown = json!({
            "result": {"type": "object"},
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": {"description": "ReferenceError: foo is not defined"}
            }
        });
        assert_eq!(
            evaluate_outcome(&thrown).unwrap_err(),
            "ReferenceError: foo is not defined"
        );

        let bare = json!({"exceptionDetails": {"text": "SyntaxError"}});
        assert_eq!(evaluate_outcome(&bare).unwrap_err(), "SyntaxError");
    }
}
