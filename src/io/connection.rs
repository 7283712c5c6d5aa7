//! Child process connection layer
//!
//! Owns the language server subprocess: spawning with piped stdio, stderr
//! draining, and graceful-then-forced termination. Transport concerns live
//! in the rpc layer; this module only hands out the raw stream pair.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Grace window between SIGTERM and SIGKILL during graceful disposal
pub const DISPOSE_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// Stop Modes
// ============================================================================

/// How to stop the server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Try graceful shutdown first (SIGTERM), then force kill if needed
    Graceful,
    /// Force kill immediately (SIGKILL)
    Force,
}

// ============================================================================
// Launch Errors
// ============================================================================

/// Error types for process launch
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Executable not found: {command}")]
    NotFound { command: String },

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: io::Error,
    },

    #[error("Stdio stream already taken: {0}")]
    StreamUnavailable(&'static str),
}

// ============================================================================
// Connection
// ============================================================================

/// A launched server process and its standard streams.
///
/// The stream pair can be taken exactly once. `dispose` is idempotent and
/// never panics; every session path ends in a `dispose` call.
#[derive(Debug)]
pub struct Connection {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    disposed: bool,
}

impl Connection {
    /// Spawn the server process with piped stdio.
    ///
    /// A relative first element is resolved against `working_directory` when
    /// it names an existing file there; otherwise the command is spawned
    /// as-is (PATH lookup applies). The working directory is set regardless.
    pub async fn launch(
        command: &[String],
        working_directory: &Path,
    ) -> Result<Self, LaunchError> {
        let (program, args) = command.split_first().ok_or(LaunchError::EmptyCommand)?;
        let program = resolve_executable(program, working_directory);

        info!("Launching server: {} {:?}", program.display(), args);

        let mut child = Command::new(&program)
            .args(args)
            .current_dir(working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    LaunchError::NotFound {
                        command: program.display().to_string(),
                    }
                } else {
                    LaunchError::Spawn {
                        command: program.display().to_string(),
                        source: e,
                    }
                }
            })?;

        let pid = child.id();
        info!("Server process started with PID: {:?}", pid);

        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::StreamUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::StreamUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(LaunchError::StreamUnavailable("stderr"))?;

        // Always drain stderr so the server cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let content = line.trim();
                        if !content.is_empty() {
                            debug!("server stderr: {content}");
                        }
                    }
                    Err(e) => {
                        error!("Failed to read server stderr: {e}");
                        break;
                    }
                }
            }
            trace!("Stderr drain finished");
        });

        Ok(Self {
            child,
            pid,
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr_task: Some(stderr_task),
            disposed: false,
        })
    }

    /// Take ownership of the stdin/stdout pair. Single use.
    pub fn take_streams(&mut self) -> Result<(ChildStdin, ChildStdout), LaunchError> {
        let stdin = self
            .stdin
            .take()
            .ok_or(LaunchError::StreamUnavailable("stdin"))?;
        let stdout = self
            .stdout
            .take()
            .ok_or(LaunchError::StreamUnavailable("stdout"))?;
        Ok((stdin, stdout))
    }

    /// Wait up to `grace` for the process to exit on its own.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Server process exited with status: {status}");
                true
            }
            Ok(Err(e)) => {
                error!("Error waiting for server process: {e}");
                false
            }
            Err(_) => {
                trace!("Server process still running after {grace:?}");
                false
            }
        }
    }

    /// Terminate the process and release its resources. Idempotent; never
    /// fails, anomalies are logged at warn level.
    pub async fn dispose(&mut self, mode: StopMode) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    debug!("Server process already exited cleanly");
                } else {
                    warn!("Server process exited with non-zero status: {status}");
                }
            }
            Ok(None) => self.terminate(mode).await,
            Err(e) => warn!("Could not query server process state: {e}"),
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    async fn terminate(&mut self, mode: StopMode) {
        #[cfg(unix)]
        if mode == StopMode::Graceful {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                info!("Sent SIGTERM to server process {pid}");
            }

            match tokio::time::timeout(DISPOSE_GRACE, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("Server process terminated: {status}");
                    return;
                }
                Ok(Err(e)) => {
                    warn!("Error waiting for terminated server process: {e}");
                    return;
                }
                Err(_) => {
                    warn!("Server process ignored SIGTERM for {DISPOSE_GRACE:?}, force killing");
                }
            }
        }

        #[cfg(not(unix))]
        if mode == StopMode::Graceful {
            warn!("Graceful termination not supported on this platform, force killing");
        }

        match self.child.kill().await {
            Ok(()) => info!("Server process killed"),
            Err(e) => warn!("Failed to kill server process: {e}"),
        }
    }

    fn kill_sync(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGKILL);
            }
            return;
        }

        let _ = self.child.start_kill();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!("Connection dropped without dispose, force killing server process");
            self.kill_sync();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

fn resolve_executable(program: &str, working_directory: &Path) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() {
        let candidate = working_directory.join(path);
        if candidate.is_file() {
            return candidate;
        }
    }
    path.to_path_buf()
}
