//! Session configuration
//!
//! Immutable configuration for one server session, produced by a validating
//! builder. Executable discovery and working-directory selection happen
//! before the builder runs; the config carries their results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::error::ConfigError;

/// Default timeout for the initialize handshake
pub const DEFAULT_INITIALIZATION_TIMEOUT_SECS: u64 = 60;

/// Default timeout for caller-issued requests (diagnostic pulls)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on any configurable timeout
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Validated configuration for a server session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server command: executable followed by its arguments
    pub command: Vec<String>,

    /// Working directory for the server process
    pub working_directory: PathBuf,

    /// Root URI announced during initialize
    pub root_uri: String,

    /// Client name announced during initialize
    pub client_name: String,

    /// Client version announced during initialize
    pub client_version: String,

    /// Timeout for the initialize handshake
    pub initialization_timeout: Duration,

    /// Timeout for caller-issued requests
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for [`SessionConfig`] with validation at `build` time
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    command: Vec<String>,
    working_directory: Option<PathBuf>,
    root_uri: Option<String>,
    client_name: Option<String>,
    client_version: Option<String>,
    initialization_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Set the server command (executable plus arguments).
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory for the server process.
    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Override the root URI. Defaults to a `file://` URI for the working
    /// directory.
    pub fn root_uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.root_uri = Some(uri.into());
        self
    }

    /// Override the client name/version announced during initialize.
    pub fn client_info<S: Into<String>>(mut self, name: S, version: S) -> Self {
        self.client_name = Some(name.into());
        self.client_version = Some(version.into());
        self
    }

    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.initialization_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(ConfigError::MissingCommand);
        }
        for part in &self.command {
            if part.contains('\0') {
                return Err(ConfigError::InvalidArgument(part.clone()));
            }
        }

        let working_directory = self
            .working_directory
            .ok_or(ConfigError::MissingWorkingDirectory)?;
        if !working_directory.exists() {
            return Err(ConfigError::WorkingDirectoryNotFound(working_directory));
        }
        if !working_directory.is_dir() {
            return Err(ConfigError::NotADirectory(working_directory));
        }

        let initialization_timeout = self
            .initialization_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_INITIALIZATION_TIMEOUT_SECS));
        let request_timeout = self
            .request_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        for (name, timeout) in [
            ("initialization_timeout", initialization_timeout),
            ("request_timeout", request_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!("{name} is zero")));
            }
            if timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
                return Err(ConfigError::InvalidTimeout(format!(
                    "{name} exceeds {MAX_TIMEOUT_SECS}s"
                )));
            }
        }

        let root_uri = match self.root_uri {
            Some(uri) => uri,
            None => derive_root_uri(&working_directory),
        };

        Ok(SessionConfig {
            command: self.command,
            working_directory,
            root_uri,
            client_name: self.client_name.unwrap_or_else(|| "lsp-session".to_string()),
            client_version: self
                .client_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            initialization_timeout,
            request_timeout,
        })
    }
}

fn derive_root_uri(working_directory: &Path) -> String {
    let absolute = working_directory
        .canonicalize()
        .unwrap_or_else(|_| working_directory.to_path_buf());
    format!("file://{}", absolute.display())
}
