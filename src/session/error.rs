//! Session error types

use std::path::PathBuf;

use crate::io::connection::LaunchError;
use crate::rpc::framing::FramingError;
use crate::rpc::protocol::RpcError;

/// Fatal session failures. Each one is reported exactly once, at error
/// level, before the event channel closes.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to launch language server: {0}")]
    Launch(#[from] LaunchError),

    #[error("Initialize handshake failed: {0}")]
    Initialize(#[source] RpcError),

    #[error("Transport failure: {0}")]
    Transport(#[from] FramingError),

    #[error("Server closed the connection")]
    ConnectionClosed,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Server command is empty")]
    MissingCommand,

    #[error("Command contains an invalid argument: {0:?}")]
    InvalidArgument(String),

    #[error("Working directory is required")]
    MissingWorkingDirectory,

    #[error("Working directory does not exist: {0}")]
    WorkingDirectoryNotFound(PathBuf),

    #[error("Working directory is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),
}
