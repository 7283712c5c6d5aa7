//! JSON-RPC 2.0 wire types and inbound message classification
//!
//! The session speaks a small, fixed subset of the protocol, so the wire
//! types are modeled directly instead of pulling in a full protocol crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version identifier
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for internal errors
pub const INTERNAL_ERROR: i64 = -32603;

/// Per-request error taxonomy for the correlator
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Transport closed")]
    TransportClosed,

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON-RPC request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC notification message (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Build a success response to a server-initiated request.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response to a server-initiated request.
    pub fn failure(id: Value, code: i64, message: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcErrorObject {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object embedded in a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-initiated traffic the session knows how to dispatch on.
///
/// A closed enum with an explicit catch-all, so every dispatch site is an
/// exhaustive match and new methods cannot be silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMethod {
    /// `textDocument/publishDiagnostics`
    PublishDiagnostics,
    /// `workspace/configuration`
    Configuration,
    /// `workspace/diagnostic/refresh`
    DiagnosticRefresh,
    /// Anything else the server sends
    Other(String),
}

impl ServerMethod {
    pub fn from_name(method: &str) -> Self {
        match method {
            "textDocument/publishDiagnostics" => Self::PublishDiagnostics,
            "workspace/configuration" => Self::Configuration,
            "workspace/diagnostic/refresh" => Self::DiagnosticRefresh,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::PublishDiagnostics => "textDocument/publishDiagnostics",
            Self::Configuration => "workspace/configuration",
            Self::DiagnosticRefresh => "workspace/diagnostic/refresh",
            Self::Other(name) => name,
        }
    }
}

/// A server-initiated message after classification, as delivered to the
/// session by the correlator.
#[derive(Debug)]
pub enum ServerCall {
    Request {
        id: Value,
        method: ServerMethod,
        params: Option<Value>,
    },
    Notification {
        method: ServerMethod,
        params: Option<Value>,
    },
}

/// An inbound frame sorted into its protocol role.
#[derive(Debug)]
pub enum Inbound {
    Response(JsonRpcResponse),
    Call(ServerCall),
}

/// Classify a decoded frame. Returns `None` for frames that are valid JSON
/// but not a recognizable JSON-RPC message shape.
pub fn classify(frame: Value) -> Option<Inbound> {
    let object = frame.as_object()?;

    let has_id = object.contains_key("id");
    let method = object.get("method").and_then(Value::as_str);

    match (has_id, method) {
        (true, Some(method)) => {
            let method = ServerMethod::from_name(method);
            let id = object.get("id").cloned().unwrap_or(Value::Null);
            let params = object.get("params").cloned();
            Some(Inbound::Call(ServerCall::Request { id, method, params }))
        }
        (false, Some(method)) => {
            let method = ServerMethod::from_name(method);
            let params = object.get("params").cloned();
            Some(Inbound::Call(ServerCall::Notification { method, params }))
        }
        (true, None) => serde_json::from_value(frame).ok().map(Inbound::Response),
        (false, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_omits_missing_params() {
        let request = JsonRpcRequest::new(1, "shutdown", None);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"}));
    }

    #[test]
    fn test_classify_response() {
        let frame = json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}});

        match classify(frame) {
            Some(Inbound::Response(response)) => {
                assert_eq!(response.id, json!(3));
                assert_eq!(response.result, Some(json!({"ok": true})));
                assert!(response.error.is_none());
            }
            other => panic!("Expected response, got: {other:?}"),
        }
    }

    #[test]
    fn test_classify_server_request() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "workspace/configuration",
            "params": {"items": []}
        });

        match classify(frame) {
            Some(Inbound::Call(ServerCall::Request { id, method, .. })) => {
                assert_eq!(id, json!(9));
                assert_eq!(method, ServerMethod::Configuration);
            }
            other => panic!("Expected server request, got: {other:?}"),
        }
    }

    #[test]
    fn test_classify_notification() {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///a", "diagnostics": []}
        });

        match classify(frame) {
            Some(Inbound::Call(ServerCall::Notification { method, .. })) => {
                assert_eq!(method, ServerMethod::PublishDiagnostics);
            }
            other => panic!("Expected notification, got: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_method_maps_to_other() {
        let frame = json!({"jsonrpc": "2.0", "method": "$/progress", "params": {}});

        match classify(frame) {
            Some(Inbound::Call(ServerCall::Notification { method, .. })) => {
                assert_eq!(method, ServerMethod::Other("$/progress".to_string()));
                assert_eq!(method.name(), "$/progress");
            }
            other => panic!("Expected notification, got: {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_shapeless_frames() {
        assert!(classify(json!({"jsonrpc": "2.0"})).is_none());
        assert!(classify(json!([1, 2, 3])).is_none());
        assert!(classify(json!("hello")).is_none());
    }
}
