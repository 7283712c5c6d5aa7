//! Outgoing message abstraction
//!
//! Caller actions are converted into [`Outgoing`] values before they touch
//! the wire. Notifications carry no identity; requests start out
//! [`UnfinalizedRequest`] (no id) and only gain one through
//! [`RpcEngine::finalize`](crate::rpc::engine::RpcEngine::finalize), which is
//! the sole constructor of [`FinalizedRequest`]. Since only a
//! `FinalizedRequest` has a transmit path, "sent before an id was assigned"
//! is not expressible.

use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::rpc::engine::RpcEngine;
use crate::rpc::protocol::RpcError;

/// Converts a raw JSON-RPC result into the caller-facing payload type.
pub type ResultConverter<T> = Box<dyn FnOnce(Value) -> Result<T, RpcError> + Send>;

/// An outgoing message that has not yet been handed to the correlator.
pub enum Outgoing<T> {
    Notification {
        method: &'static str,
        params: Option<Value>,
    },
    Request(UnfinalizedRequest<T>),
}

impl<T> fmt::Debug for Outgoing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notification { method, .. } => {
                f.debug_struct("Notification").field("method", method).finish()
            }
            Self::Request(request) => f
                .debug_struct("Request")
                .field("method", &request.method)
                .finish(),
        }
    }
}

/// A request that does not yet carry a correlation id.
pub struct UnfinalizedRequest<T> {
    pub(crate) method: &'static str,
    pub(crate) params: Option<Value>,
    pub(crate) convert: ResultConverter<T>,
}

impl<T> UnfinalizedRequest<T> {
    pub fn new(method: &'static str, params: Option<Value>, convert: ResultConverter<T>) -> Self {
        Self {
            method,
            params,
            convert,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }
}

/// A request stamped with its correlation id, ready to transmit.
///
/// Only [`RpcEngine::finalize`] produces these.
pub struct FinalizedRequest<T> {
    pub(crate) id: u64,
    pub(crate) method: &'static str,
    pub(crate) params: Option<Value>,
    pub(crate) convert: ResultConverter<T>,
}

impl<T> FinalizedRequest<T> {
    /// The correlation id assigned at finalization.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Transmit the request and await its converted result.
    ///
    /// Consumes the request: a finalized id is used exactly once.
    pub async fn dispatch(self, engine: &RpcEngine, timeout: Duration) -> Result<T, RpcError> {
        let raw = engine
            .request_with_id(self.id, self.method, self.params, timeout)
            .await?;
        (self.convert)(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unfinalized_request_exposes_method() {
        let request: UnfinalizedRequest<u64> = UnfinalizedRequest::new(
            "textDocument/diagnostic",
            Some(json!({"textDocument": {"uri": "file:///x"}})),
            Box::new(|value| {
                value
                    .as_u64()
                    .ok_or_else(|| RpcError::Protocol("expected a number".to_string()))
            }),
        );

        assert_eq!(request.method(), "textDocument/diagnostic");
    }

    #[test]
    fn test_outgoing_debug_shows_method_only() {
        let outgoing: Outgoing<()> = Outgoing::Notification {
            method: "exit",
            params: None,
        };

        assert_eq!(format!("{outgoing:?}"), r#"Notification { method: "exit" }"#);
    }
}
