//! JSON-RPC correlation engine
//!
//! Owns the split halves of the server's byte stream: a writer task
//! serializes every outgoing frame (so frames never interleave) and a reader
//! task decodes inbound frames and sorts them into responses (matched to
//! pending requests by id) and server-initiated calls (forwarded to the
//! session over a channel). Fatal decode errors surface once through a
//! dedicated channel.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{Level, debug, error, trace, warn};

use crate::message::{FinalizedRequest, UnfinalizedRequest};
use crate::rpc::framing::{FrameReader, FrameWriter, FramingError};
use crate::rpc::protocol::{
    Inbound, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcError, ServerCall, classify,
};
use crate::{log_lsp_message, log_timing};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// Message correlator over a framed byte stream.
///
/// Cheap to clone; all clones share the same outbound queue and pending
/// table. Constructed from any `AsyncRead`/`AsyncWrite` pair, so tests can
/// drive it over an in-memory duplex instead of child stdio.
#[derive(Clone)]
pub struct RpcEngine {
    outbound: mpsc::UnboundedSender<Value>,
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    // Keeps the fatal channel open so the session's select never sees a
    // spurious close while the engine is alive.
    _fatal: mpsc::UnboundedSender<FramingError>,
}

impl RpcEngine {
    /// Build an engine over a read/write stream pair and spawn its I/O tasks.
    ///
    /// Returns the engine plus the server-call stream and the fatal-error
    /// channel. The server-call stream ends when the server closes its
    /// output; the fatal channel delivers at most one framing error.
    pub fn new<R, W>(
        reader: R,
        writer: W,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<ServerCall>,
        mpsc::UnboundedReceiver<FramingError>,
    )
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(writer_task(FrameWriter::new(writer), outbound_rx));
        tokio::spawn(reader_task(
            FrameReader::new(reader),
            pending.clone(),
            calls_tx,
            fatal_tx.clone(),
            closed.clone(),
        ));

        let engine = Self {
            outbound: outbound_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            closed,
            _fatal: fatal_tx,
        };

        (engine, calls_rx, fatal_rx)
    }

    /// Send a notification. Fire-and-forget: the frame is queued for the
    /// writer task and no response is expected.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let frame = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        log_lsp_message!(Level::DEBUG, "outgoing", method, &frame);
        self.enqueue(frame)
    }

    /// Send a request and await its result, racing against `timeout`.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.request_with_id(id, method, params, timeout).await
    }

    /// Assign a correlation id to an unfinalized request.
    ///
    /// The only way to obtain a [`FinalizedRequest`], which in turn is the
    /// only message shape with a request transmit path.
    pub fn finalize<T>(&self, request: UnfinalizedRequest<T>) -> FinalizedRequest<T> {
        FinalizedRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method: request.method,
            params: request.params,
            convert: request.convert,
        }
    }

    /// Reply to a server-initiated request.
    pub fn respond(&self, id: Value, result: Value) -> Result<(), RpcError> {
        let frame = serde_json::to_value(JsonRpcResponse::success(id, result))?;
        log_lsp_message!(Level::DEBUG, "outgoing", "response", &frame);
        self.enqueue(frame)
    }

    /// Reply to a server-initiated request with an error.
    pub fn respond_error(&self, id: Value, code: i64, message: &str) -> Result<(), RpcError> {
        let frame = serde_json::to_value(JsonRpcResponse::failure(id, code, message))?;
        log_lsp_message!(Level::DEBUG, "outgoing", "response", &frame);
        self.enqueue(frame)
    }

    /// Stop accepting sends and resolve every pending request with
    /// [`RpcError::Cancelled`]. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut pending = self.pending.lock().await;
        for (id, sender) in pending.drain() {
            debug!("Cancelling pending request {id} on engine close");
            let _ = sender.send(Err(RpcError::Cancelled));
        }
    }

    pub(crate) async fn request_with_id(
        &self,
        id: u64,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let frame = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        log_lsp_message!(Level::DEBUG, "outgoing", method, &frame);
        let started = Instant::now();

        if let Err(error) = self.enqueue(frame) {
            self.pending.lock().await.remove(&id);
            return Err(error);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => {
                log_timing!(Level::DEBUG, method, started.elapsed());
                outcome
            }
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => {
                // Deregister so a late response is dropped, not misdelivered.
                self.pending.lock().await.remove(&id);
                warn!("Request {id} ({method}) timed out after {timeout:?}");
                Err(RpcError::Timeout)
            }
        }
    }

    fn enqueue(&self, frame: Value) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::TransportClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| RpcError::TransportClosed)
    }
}

async fn writer_task<W>(mut writer: FrameWriter<W>, mut outbound: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = writer.write_frame(&frame).await {
            error!("Failed to write frame to server: {e}");
            break;
        }
    }
    trace!("Writer task finished");
}

async fn reader_task<R>(
    mut reader: FrameReader<R>,
    pending: PendingMap,
    calls: mpsc::UnboundedSender<ServerCall>,
    fatal: mpsc::UnboundedSender<FramingError>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if closed.load(Ordering::SeqCst) {
                    trace!("Engine closed, dropping inbound frame");
                    break;
                }
                dispatch_frame(frame, &pending, &calls).await;
            }
            Ok(None) => {
                trace!("Server closed its output stream");
                break;
            }
            Err(e) => {
                error!("Fatal transport error: {e}");
                let _ = fatal.send(e);
                break;
            }
        }
    }
}

async fn dispatch_frame(
    frame: Value,
    pending: &PendingMap,
    calls: &mpsc::UnboundedSender<ServerCall>,
) {
    match classify(frame) {
        Some(Inbound::Response(response)) => {
            log_lsp_message!(Level::DEBUG, "incoming", "response", &response);
            resolve_response(response, pending).await;
        }
        Some(Inbound::Call(call)) => {
            let method = match &call {
                ServerCall::Request { method, .. } => method.name().to_string(),
                ServerCall::Notification { method, .. } => method.name().to_string(),
            };
            log_lsp_message!(Level::DEBUG, "incoming", method.as_str(), &call);
            let _ = calls.send(call);
        }
        None => {
            warn!("Dropping frame with unrecognizable JSON-RPC shape");
        }
    }
}

async fn resolve_response(response: JsonRpcResponse, pending: &PendingMap) {
    let Some(id) = response.id.as_u64() else {
        warn!("Dropping response with non-numeric id: {:?}", response.id);
        return;
    };

    let Some(sender) = pending.lock().await.remove(&id) else {
        // Either the request timed out or the server invented an id.
        debug!("Dropping response for unknown or expired request {id}");
        return;
    };

    let outcome = match (response.result, response.error) {
        (_, Some(error)) => Err(RpcError::Server {
            code: error.code,
            message: error.message,
        }),
        // A null result (shutdown's legal answer) deserializes to None, so
        // absent and null collapse into the same success case.
        (result, None) => Ok(result.unwrap_or(Value::Null)),
    };

    let _ = sender.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::ServerMethod;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

    struct FakeServer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    fn engine_pair() -> (
        RpcEngine,
        mpsc::UnboundedReceiver<ServerCall>,
        mpsc::UnboundedReceiver<FramingError>,
        FakeServer,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);

        let (engine, calls, fatal) = RpcEngine::new(client_read, client_write);
        let server = FakeServer {
            reader: FrameReader::new(server_read),
            writer: FrameWriter::new(server_write),
        };
        (engine, calls, fatal, server)
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (engine, _calls, _fatal, mut server) = engine_pair();

        let server_task = tokio::spawn(async move {
            let frame = server.reader.read_frame().await.unwrap().unwrap();
            assert_eq!(frame["method"], "initialize");
            let id = frame["id"].clone();
            server
                .writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": {"ok": true}}))
                .await
                .unwrap();
        });

        let result = engine
            .request("initialize", Some(json!({})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_dropped() {
        let (engine, _calls, _fatal, mut server) = engine_pair();

        let result = engine
            .request("slow/method", None, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RpcError::Timeout)));

        // Answer the expired request late, then serve a fresh one. The late
        // frame must not be misdelivered to the new request.
        let server_task = tokio::spawn(async move {
            let expired = server.reader.read_frame().await.unwrap().unwrap();
            assert_eq!(expired["method"], "slow/method");
            server
                .writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": expired["id"].clone(), "result": "stale"}))
                .await
                .unwrap();

            let frame = server.reader.read_frame().await.unwrap().unwrap();
            assert_eq!(frame["method"], "fast/method");
            let id = frame["id"].clone();
            server
                .writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": "fresh"}))
                .await
                .unwrap();
        });

        let result = engine
            .request("fast/method", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, json!("fresh"));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let (engine, _calls, _fatal, mut server) = engine_pair();

        let server_task = tokio::spawn(async move {
            let frame = server.reader.read_frame().await.unwrap().unwrap();
            let id = frame["id"].clone();
            server
                .writer
                .write_frame(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "method not found"}
                }))
                .await
                .unwrap();
        });

        let result = engine
            .request("no/such/method", None, Duration::from_secs(5))
            .await;
        match result {
            Err(RpcError::Server { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("Expected server error, got: {other:?}"),
        }
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_preserve_order() {
        let (engine, _calls, _fatal, mut server) = engine_pair();

        engine.notify("first", Some(json!({"n": 1}))).unwrap();
        engine.notify("second", Some(json!({"n": 2}))).unwrap();

        let first = server.reader.read_frame().await.unwrap().unwrap();
        let second = server.reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first["method"], "first");
        assert_eq!(second["method"], "second");
        assert!(first.get("id").is_none());
    }

    #[tokio::test]
    async fn test_server_initiated_request_is_forwarded() {
        let (engine, mut calls, _fatal, mut server) = engine_pair();

        server
            .writer
            .write_frame(&json!({
                "jsonrpc": "2.0",
                "id": 77,
                "method": "workspace/configuration",
                "params": {"items": [{"section": "lua"}]}
            }))
            .await
            .unwrap();

        match calls.recv().await.unwrap() {
            ServerCall::Request { id, method, .. } => {
                assert_eq!(method, ServerMethod::Configuration);
                engine.respond(id, json!([null])).unwrap();
            }
            other => panic!("Expected request, got: {other:?}"),
        }

        let reply = server.reader.read_frame().await.unwrap().unwrap();
        assert_eq!(reply["id"], 77);
        assert_eq!(reply["result"], json!([null]));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_and_rejects_sends() {
        let (engine, _calls, _fatal, _server) = engine_pair();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .request("never/answered", None, Duration::from_secs(30))
                    .await
            })
        };

        // Let the request register before closing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.close().await;
        engine.close().await; // idempotent

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(RpcError::Cancelled)));
        assert!(matches!(
            engine.notify("exit", None),
            Err(RpcError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        use tokio::io::AsyncWriteExt;

        let (client, server) = duplex(4096);
        let (client_read, client_write) = split(client);
        let (_engine, _calls, mut fatal) = RpcEngine::new(client_read, client_write);

        let (_server_read, mut server_write) = split(server);
        server_write
            .write_all(b"Content-Length: banana\r\n\r\n")
            .await
            .unwrap();
        server_write.flush().await.unwrap();

        let error = fatal.recv().await.unwrap();
        assert!(matches!(error, FramingError::InvalidContentLength(_)));
    }

    #[tokio::test]
    async fn test_finalized_request_dispatch_converts_result() {
        let (engine, _calls, _fatal, mut server) = engine_pair();

        let request: UnfinalizedRequest<bool> = UnfinalizedRequest::new(
            "custom/probe",
            None,
            Box::new(|value| {
                value
                    .get("ready")
                    .and_then(Value::as_bool)
                    .ok_or_else(|| RpcError::Protocol("missing ready flag".to_string()))
            }),
        );
        let finalized = engine.finalize(request);
        let id = finalized.id();

        let server_task = tokio::spawn(async move {
            let frame = server.reader.read_frame().await.unwrap().unwrap();
            assert_eq!(frame["id"], id);
            server
                .writer
                .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": {"ready": true}}))
                .await
                .unwrap();
        });

        let ready = finalized
            .dispatch(&engine, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(ready);
        server_task.await.unwrap();
    }
}
