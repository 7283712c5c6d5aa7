//! Client-side session manager for language servers spoken over a
//! subprocess's standard streams.
//!
//! One [`session::spawn`] call owns the full lifecycle of one server
//! process: launch, the initialize handshake, document synchronization and
//! diagnostics traffic while Ready, and a graceful-then-forced teardown. The
//! caller supplies resource identity and configuration through
//! [`SessionHooks`] and drives everything else over a pair of channels.
//!
//! Layering, bottom up:
//! - [`io`]: the server subprocess and its raw streams
//! - [`rpc`]: Content-Length framing and JSON-RPC correlation
//! - [`message`]: the outgoing-message abstraction (finalize-before-send)
//! - [`diagnostics`]: wire diagnostics → caller model translation
//! - [`session`]: the lifecycle state machine and caller surface

pub mod diagnostics;
pub mod io;
pub mod logging;
pub mod message;
pub mod rpc;
pub mod session;

#[cfg(test)]
pub mod test_utils;

pub use diagnostics::{
    Diagnostic, DiagnosticReport, Position, PublishedDiagnostics, Range, Severity,
};
pub use io::connection::{LaunchError, StopMode};
pub use rpc::framing::FramingError;
pub use rpc::protocol::RpcError;
pub use session::capabilities::{Capabilities, PullDiagnostics, SyncKind, TextDocumentSync};
pub use session::config::{SessionConfig, SessionConfigBuilder};
pub use session::error::{ConfigError, SessionError};
pub use session::{
    Action, ConfigurationItem, ContentChange, FileChange, FileChangeKind, ResponsePayload,
    SessionEvent, SessionHandle, SessionHooks, spawn,
};
