use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter (e.g., "debug", "info", "warn", "error")
    pub level: String,
    /// Optional log file path. If None, logs only to stderr
    pub file_path: Option<PathBuf>,
    /// Whether to use structured JSON format for logs
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create LogConfig from environment variables
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_path = env::var("LSP_SESSION_LOG_FILE").ok().map(|path| {
            let path_buf = PathBuf::from(path);

            // Add process ID if LSP_SESSION_LOG_UNIQUE is set
            if env::var("LSP_SESSION_LOG_UNIQUE").unwrap_or_default() == "true" {
                with_pid_suffix(path_buf)
            } else {
                path_buf
            }
        });

        let json_format = env::var("LSP_SESSION_LOG_JSON").unwrap_or_default() == "true";

        Self {
            level,
            file_path,
            json_format,
        }
    }
}

/// Insert the process ID before the file extension, so concurrent sessions
/// logging to the same configured path get distinct files.
fn with_pid_suffix(mut path_buf: PathBuf) -> PathBuf {
    if let Some(filename) = path_buf.file_stem() {
        let extension = path_buf
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let pid = std::process::id();
        let unique_filename = if extension.is_empty() {
            format!("{}.{}", filename.to_string_lossy(), pid)
        } else {
            format!("{}.{}.{}", filename.to_string_lossy(), pid, extension)
        };

        path_buf.set_file_name(unique_filename);
    }

    path_buf
}

/// Initialize the logging system based on configuration
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Create environment filter from log level
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;

    // Build the subscriber based on configuration
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        // File + JSON format
        (Some(file_path), true) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);

            subscriber.with(file_layer).try_init()?;
        }
        // File + human readable format
        (Some(file_path), false) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(file_layer).try_init()?;
        }
        // Stderr only + JSON format
        (None, true) => {
            let stderr_layer = fmt::layer().json().with_writer(io::stderr).with_ansi(false);

            subscriber.with(stderr_layer).try_init()?;
        }
        // Stderr only + human readable format (default)
        (None, false) => {
            let stderr_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);

            subscriber.with(stderr_layer).try_init()?;
        }
    }

    Ok(())
}

/// Helper macro to log structured LSP requests/responses in one line
#[macro_export]
macro_rules! log_lsp_message {
    ($level:expr, $direction:expr, $method:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            method = $method,
            data = ?$data,
            pid = std::process::id(),
            "LSP message"
        );
    };
}

/// Helper macro to log performance timing
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "Performance timing"
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.file_path.is_none());
        assert!(!config.json_format);
    }

    #[test]
    fn test_pid_suffix_with_extension() {
        let path = with_pid_suffix(PathBuf::from("/var/log/session.log"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("session."));
        assert!(name.ends_with(".log"));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_pid_suffix_without_extension() {
        let path = with_pid_suffix(PathBuf::from("/var/log/session"));
        let expected = format!("session.{}", std::process::id());

        assert_eq!(path.file_name().unwrap().to_string_lossy(), expected);
    }

    #[test]
    fn test_from_env_unique_file_path() {
        unsafe {
            env::set_var("LSP_SESSION_LOG_FILE", "/tmp/lsp-session.log");
            env::set_var("LSP_SESSION_LOG_UNIQUE", "true");
        }
        let config = LogConfig::from_env();
        unsafe {
            env::remove_var("LSP_SESSION_LOG_FILE");
            env::remove_var("LSP_SESSION_LOG_UNIQUE");
        }

        let name = config
            .file_path
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("lsp-session."));
        assert!(name.ends_with(".log"));
        assert!(name.contains(&std::process::id().to_string()));
        assert!(!config.json_format);
    }

    // The global subscriber can only be installed once per process, so this
    // stays out of test-logging runs where the ctor hook already claims it.
    #[cfg(not(feature = "test-logging"))]
    #[test]
    fn test_init_logging_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("session.log");

        let config = LogConfig {
            level: "info".to_string(),
            file_path: Some(log_path.clone()),
            json_format: false,
        };
        init_logging(config).unwrap();

        tracing::info!("file sink line");

        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("file sink line"));
    }
}
