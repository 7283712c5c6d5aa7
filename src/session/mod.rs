//! Session lifecycle
//!
//! One session owns one server process and drives it through a strictly
//! forward state machine: Starting → Initializing → Ready → ShuttingDown →
//! Exiting → Closed. Callers interact through two channels: an action sender
//! (closing it requests a graceful shutdown) and an event receiver (its
//! closure is the definitive end-of-session signal). On every path, clean or
//! fatal, the process is always disposed and the event channel always
//! closes; only sessions that reached Ready get the exit handshake.

pub mod capabilities;
pub mod config;
pub mod error;

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::diagnostics::{
    DiagnosticReport, PublishedDiagnostics, Range, document_pull_params, translate_document_report,
    translate_publish, translate_workspace_report, workspace_pull_params,
};
use crate::io::connection::{Connection, StopMode};
use crate::message::{Outgoing, UnfinalizedRequest};
use crate::rpc::engine::RpcEngine;
use crate::rpc::framing::FramingError;
use crate::rpc::protocol::{INTERNAL_ERROR, RpcError, ServerCall, ServerMethod};
use crate::session::capabilities::Capabilities;
use crate::session::config::SessionConfig;
use crate::session::error::SessionError;

/// Timeout for the shutdown request during graceful teardown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace window for voluntary process exit after the exit notification
pub const EXIT_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// Caller Boundary
// ============================================================================

/// Caller-provided collaborators for a session.
///
/// The session never interprets resource identity itself; it round-trips
/// everything through these hooks.
pub trait SessionHooks: Send + Sync + 'static {
    /// The caller's resource identifier (a file handle, a path, an id).
    type Resource: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Render a resource as the URI the server sees.
    fn resource_uri(&self, resource: &Self::Resource) -> String;

    /// Map a server-side URI back to a resource. `None` means the URI does
    /// not belong to this caller and traffic about it is dropped.
    fn resolve_uri(&self, uri: &str) -> Option<Self::Resource>;

    /// Answer a `workspace/configuration` pull: one value per requested
    /// item, null for sections the caller does not recognize.
    fn configuration(&self, items: &[ConfigurationItem]) -> Vec<Value>;
}

/// One item of a `workspace/configuration` request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    #[serde(default)]
    pub scope_uri: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationParams {
    #[serde(default)]
    items: Vec<ConfigurationItem>,
}

// ============================================================================
// Actions and Events
// ============================================================================

/// A content change within a `DidChange` action: ranged (incremental) or
/// whole-document when `range` is `None`.
#[derive(Debug, Clone)]
pub struct ContentChange {
    pub range: Option<Range>,
    pub text: String,
}

/// Kind of watched-file change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    Created,
    Changed,
    Deleted,
}

impl FileChangeKind {
    fn to_wire(self) -> i64 {
        match self {
            Self::Created => 1,
            Self::Changed => 2,
            Self::Deleted => 3,
        }
    }
}

/// A single watched-file change
#[derive(Debug, Clone)]
pub struct FileChange<R> {
    pub resource: R,
    pub kind: FileChangeKind,
}

/// Caller-initiated work, submitted through the session handle.
///
/// Actions are forwarded in submission order, and only once the session is
/// Ready.
#[derive(Debug)]
pub enum Action<R> {
    DidOpen {
        resource: R,
        language_id: String,
        version: i32,
        text: String,
    },
    DidChange {
        resource: R,
        version: i32,
        changes: Vec<ContentChange>,
    },
    DidClose {
        resource: R,
    },
    WatchedFilesChanged {
        changes: Vec<FileChange<R>>,
    },
    PullDocumentDiagnostics {
        resource: R,
        previous_result_id: Option<String>,
    },
    PullWorkspaceDiagnostics {
        previous_result_ids: HashMap<R, String>,
    },
}

/// Result payload of a caller-issued request
#[derive(Debug)]
pub enum ResponsePayload<R> {
    DocumentDiagnostics(DiagnosticReport),
    WorkspaceDiagnostics(HashMap<R, DiagnosticReport>),
}

/// Events emitted by the session. The channel closing is the definitive
/// "session over" signal.
#[derive(Debug)]
pub enum SessionEvent<R> {
    /// The handshake completed; the capability snapshot is final.
    Initialized(Capabilities),
    /// The server pushed diagnostics for a resource.
    Diagnostics {
        resource: R,
        diagnostics: PublishedDiagnostics,
    },
    /// The server asked for all pulled diagnostics to be re-requested.
    DiagnosticsRefreshRequested,
    /// A caller-issued request completed. `id` matches the wire request id.
    Response {
        id: u64,
        result: Result<ResponsePayload<R>, RpcError>,
    },
}

// ============================================================================
// Session Handle
// ============================================================================

/// Caller's grip on a running session.
pub struct SessionHandle<R> {
    actions: Option<mpsc::UnboundedSender<Action<R>>>,
    events: mpsc::UnboundedReceiver<SessionEvent<R>>,
}

impl<R> SessionHandle<R> {
    /// Submit an action. Returns false once the session is shutting down or
    /// gone.
    pub fn submit(&self, action: Action<R>) -> bool {
        match &self.actions {
            Some(sender) => sender.send(action).is_ok(),
            None => false,
        }
    }

    /// Receive the next session event. `None` means the session is Closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent<R>> {
        self.events.recv().await
    }

    /// Request a graceful shutdown by closing the action channel. Events
    /// keep flowing until teardown completes.
    pub fn close(&mut self) {
        self.actions = None;
    }
}

/// Launch a server session. Returns immediately; the state machine runs on
/// its own task and reports progress through the handle's event stream.
pub fn spawn<H: SessionHooks>(config: SessionConfig, hooks: H) -> SessionHandle<H::Resource> {
    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = SessionTask {
        config,
        hooks: Arc::new(hooks),
        events: events_tx,
    };
    tokio::spawn(task.run(actions_rx));

    SessionHandle {
        actions: Some(actions_tx),
        events: events_rx,
    }
}

// ============================================================================
// State Machine
// ============================================================================

struct SessionTask<H: SessionHooks> {
    config: SessionConfig,
    hooks: Arc<H>,
    events: mpsc::UnboundedSender<SessionEvent<H::Resource>>,
}

impl<H: SessionHooks> SessionTask<H> {
    /// Starting: launch the process, then hand its streams to the connected
    /// phase.
    async fn run(self, actions: mpsc::UnboundedReceiver<Action<H::Resource>>) {
        let mut connection =
            match Connection::launch(&self.config.command, &self.config.working_directory).await {
                Ok(connection) => connection,
                Err(e) => {
                    error!("Session failed: {}", SessionError::Launch(e));
                    return;
                }
            };

        let (stdin, stdout) = match connection.take_streams() {
            Ok(streams) => streams,
            Err(e) => {
                error!("Session failed: {}", SessionError::Launch(e));
                connection.dispose(StopMode::Force).await;
                return;
            }
        };

        self.run_connected(actions, stdout, stdin, Some(connection))
            .await;
    }

    /// Initializing through Closed, over an already-established stream pair.
    /// `connection` is `None` when the transport is not a child process
    /// (in-memory streams in tests).
    async fn run_connected<RD, WR>(
        self,
        mut actions: mpsc::UnboundedReceiver<Action<H::Resource>>,
        reader: RD,
        writer: WR,
        mut connection: Option<Connection>,
    ) where
        RD: AsyncRead + Unpin + Send + 'static,
        WR: AsyncWrite + Unpin + Send + 'static,
    {
        let (engine, mut calls, mut fatal) = RpcEngine::new(reader, writer);

        // Initializing
        let handshake = engine
            .request(
                "initialize",
                Some(initialize_params(&self.config)),
                self.config.initialization_timeout,
            )
            .await;

        let result = match handshake {
            Ok(result) => result,
            Err(e) => {
                // The server never acknowledged us: there is nothing to shut
                // down, so skip the exit handshake and its grace window and
                // dispose straight away.
                error!("Session failed: {}", SessionError::Initialize(e));
                engine.close().await;
                if let Some(connection) = connection.as_mut() {
                    connection.dispose(StopMode::Graceful).await;
                }
                debug!("Session closed");
                return;
            }
        };

        let capabilities = Capabilities::from_initialize(&result);
        info!("Session initialized: {capabilities:?}");
        let _ = self.events.send(SessionEvent::Initialized(capabilities));

        let clean = match engine.notify("initialized", Some(json!({}))) {
            // Ready
            Ok(()) => match self.serve(&engine, &mut actions, &mut calls, &mut fatal).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Session failed: {e}");
                    false
                }
            },
            Err(_) => {
                error!("Session failed: {}", SessionError::ConnectionClosed);
                false
            }
        };

        // ShuttingDown (skipped when a fatal error short-circuited Ready)
        if clean {
            if let Err(e) = engine.request("shutdown", None, SHUTDOWN_TIMEOUT).await {
                warn!("Shutdown request failed: {e}");
            }
        }

        // Exiting: best-effort exit notification, then stop correlating
        let _ = engine.notify("exit", None);
        engine.close().await;

        // Closed
        if let Some(connection) = connection.as_mut() {
            let exited = connection.wait_for_exit(EXIT_GRACE).await;
            let mode = if exited {
                StopMode::Graceful
            } else {
                StopMode::Force
            };
            connection.dispose(mode).await;
        }
        debug!("Session closed");
        // self.events drops here, closing the event stream
    }

    /// Ready: multiplex caller actions, server calls and fatal transport
    /// errors. Returns `Ok(())` when the caller requested shutdown; a fatal
    /// error short-circuits teardown and is reported by the caller.
    async fn serve(
        &self,
        engine: &RpcEngine,
        actions: &mut mpsc::UnboundedReceiver<Action<H::Resource>>,
        calls: &mut mpsc::UnboundedReceiver<ServerCall>,
        fatal: &mut mpsc::UnboundedReceiver<FramingError>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                action = actions.recv() => match action {
                    Some(action) => match self.transmit(engine, self.convert_action(action)) {
                        Ok(()) => {}
                        Err(RpcError::TransportClosed) => {
                            return Err(SessionError::ConnectionClosed);
                        }
                        Err(e) => warn!("Failed to forward action: {e}"),
                    },
                    None => {
                        debug!("Action channel closed, beginning shutdown");
                        return Ok(());
                    }
                },
                call = calls.recv() => match call {
                    Some(call) => self.handle_server_call(engine, call),
                    // The reader drops the call sender right after reporting a
                    // framing error, so this branch can win the race against
                    // the fatal one. Drain fatal first to name the root cause.
                    None => match fatal.try_recv() {
                        Ok(e) => return Err(SessionError::Transport(e)),
                        Err(_) => return Err(SessionError::ConnectionClosed),
                    },
                },
                Some(e) = fatal.recv() => {
                    return Err(SessionError::Transport(e));
                }
            }
        }
    }

    /// Convert a caller action into its wire form.
    fn convert_action(
        &self,
        action: Action<H::Resource>,
    ) -> Outgoing<ResponsePayload<H::Resource>> {
        match action {
            Action::DidOpen {
                resource,
                language_id,
                version,
                text,
            } => Outgoing::Notification {
                method: "textDocument/didOpen",
                params: Some(json!({
                    "textDocument": {
                        "uri": self.hooks.resource_uri(&resource),
                        "languageId": language_id,
                        "version": version,
                        "text": text,
                    }
                })),
            },
            Action::DidChange {
                resource,
                version,
                changes,
            } => {
                let changes: Vec<Value> = changes
                    .into_iter()
                    .map(|change| match change.range {
                        Some(range) => json!({"range": range, "text": change.text}),
                        None => json!({"text": change.text}),
                    })
                    .collect();
                Outgoing::Notification {
                    method: "textDocument/didChange",
                    params: Some(json!({
                        "textDocument": {
                            "uri": self.hooks.resource_uri(&resource),
                            "version": version,
                        },
                        "contentChanges": changes,
                    })),
                }
            }
            Action::DidClose { resource } => Outgoing::Notification {
                method: "textDocument/didClose",
                params: Some(json!({
                    "textDocument": {"uri": self.hooks.resource_uri(&resource)}
                })),
            },
            Action::WatchedFilesChanged { changes } => {
                let changes: Vec<Value> = changes
                    .iter()
                    .map(|change| {
                        json!({
                            "uri": self.hooks.resource_uri(&change.resource),
                            "type": change.kind.to_wire(),
                        })
                    })
                    .collect();
                Outgoing::Notification {
                    method: "workspace/didChangeWatchedFiles",
                    params: Some(json!({"changes": changes})),
                }
            }
            Action::PullDocumentDiagnostics {
                resource,
                previous_result_id,
            } => {
                let uri = self.hooks.resource_uri(&resource);
                let params = document_pull_params(&uri, previous_result_id.as_deref());
                let had_previous = previous_result_id.is_some();
                Outgoing::Request(UnfinalizedRequest::new(
                    "textDocument/diagnostic",
                    Some(params),
                    Box::new(move |value| {
                        translate_document_report(value, had_previous)
                            .map(ResponsePayload::DocumentDiagnostics)
                    }),
                ))
            }
            Action::PullWorkspaceDiagnostics { previous_result_ids } => {
                let params = workspace_pull_params(
                    previous_result_ids
                        .iter()
                        .map(|(resource, id)| (self.hooks.resource_uri(resource), id.clone())),
                );
                let hooks = Arc::clone(&self.hooks);
                Outgoing::Request(UnfinalizedRequest::new(
                    "workspace/diagnostic",
                    Some(params),
                    Box::new(move |value| {
                        translate_workspace_report(
                            |uri| hooks.resolve_uri(uri),
                            &previous_result_ids,
                            value,
                        )
                        .map(ResponsePayload::WorkspaceDiagnostics)
                    }),
                ))
            }
        }
    }

    /// Hand an outgoing message to the correlator. Requests are finalized
    /// here and awaited on their own task so Ready never blocks on a slow
    /// server.
    fn transmit(
        &self,
        engine: &RpcEngine,
        outgoing: Outgoing<ResponsePayload<H::Resource>>,
    ) -> Result<(), RpcError> {
        match outgoing {
            Outgoing::Notification { method, params } => engine.notify(method, params),
            Outgoing::Request(request) => {
                let finalized = engine.finalize(request);
                let id = finalized.id();
                let engine = engine.clone();
                let events = self.events.clone();
                let timeout = self.config.request_timeout;
                tokio::spawn(async move {
                    let result = finalized.dispatch(&engine, timeout).await;
                    let _ = events.send(SessionEvent::Response { id, result });
                });
                Ok(())
            }
        }
    }

    /// Dispatch one server-initiated message. A malformed payload faults
    /// that message only: logged, answered with an error where an answer is
    /// owed, and the session carries on.
    fn handle_server_call(&self, engine: &RpcEngine, call: ServerCall) {
        match call {
            ServerCall::Notification {
                method: ServerMethod::PublishDiagnostics,
                params,
            } => {
                let params = params.unwrap_or(Value::Null);
                match translate_publish(|uri| self.hooks.resolve_uri(uri), params) {
                    Ok(Some((resource, diagnostics))) => {
                        let _ = self
                            .events
                            .send(SessionEvent::Diagnostics { resource, diagnostics });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Malformed publishDiagnostics payload: {e}"),
                }
            }
            ServerCall::Notification { method, .. } => {
                trace!("Ignoring server notification: {}", method.name());
            }
            ServerCall::Request {
                id,
                method: ServerMethod::Configuration,
                params,
            } => {
                let params = params.unwrap_or_else(|| json!({}));
                match serde_json::from_value::<ConfigurationParams>(params) {
                    Ok(request) => {
                        let values = self.hooks.configuration(&request.items);
                        let _ = engine.respond(id, Value::Array(values));
                    }
                    Err(e) => {
                        warn!("Malformed workspace/configuration params: {e}");
                        let _ = engine.respond_error(
                            id,
                            INTERNAL_ERROR,
                            "malformed configuration params",
                        );
                    }
                }
            }
            ServerCall::Request {
                id,
                method: ServerMethod::DiagnosticRefresh,
                ..
            } => {
                let _ = engine.respond(id, Value::Null);
                let _ = self.events.send(SessionEvent::DiagnosticsRefreshRequested);
            }
            ServerCall::Request { id, method, .. } => {
                debug!(
                    "Answering unhandled server request {} with an empty result",
                    method.name()
                );
                let _ = engine.respond(id, Value::Null);
            }
        }
    }
}

fn initialize_params(config: &SessionConfig) -> Value {
    json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": config.client_name,
            "version": config.client_version,
        },
        "rootUri": config.root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {"dynamicRegistration": false, "didSave": false},
                "publishDiagnostics": {"versionSupport": true},
                "diagnostic": {"relatedDocumentSupport": false},
            },
            "workspace": {
                "configuration": true,
                "diagnostics": {"refreshSupport": true},
                "didChangeWatchedFiles": {"dynamicRegistration": false},
            },
        },
    })
}
