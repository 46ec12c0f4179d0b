//! Structured logging for bayropt
//!
//! Built on `tracing`. Output goes to stderr in either a human-friendly
//! (`pretty`) or a JSON-lines (`json`) format, optionally mirrored to a file.
//!
//! ```ignore
//! use bayropt_core::logging::{init_logging, LogConfig};
//! use bayropt_core::config::LogFormat;
//!
//! init_logging(&LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Json,
//!     file: None,
//! })?;
//! ```
//!
//! # Fields
//!
//! Events use these field names consistently:
//! - `hash`: canonical parameter hash of a sample
//! - `sample`: on-disk sample name
//! - `params`: rendered parameter set
//! - `run_dir`: pipeline run directory
//! - `index`: database index path

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

static LOGGING_INITIALIZED: OnceLock<bool> = OnceLock::new();

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Logging configuration, usually the `logging` section of an experiment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (`info`, `bayropt_core=debug`, ...). `RUST_LOG` wins.
    pub level: String,

    pub format: LogFormat,

    /// Optional file that receives a copy of every event.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let existed = parent.exists();
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            if !existed {
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }
    }
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    ensure_parent_dir(path)?;
    let existed = path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    #[cfg(unix)]
    if !existed {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

/// Filter for `config`, overridden by `RUST_LOG` when that is set.
fn build_filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|_| LogError::InvalidLevel(config.level.clone()))
}

/// One formatting layer writing to `writer`.
fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::NONE)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_writer(writer)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber. Only the first call succeeds.
///
/// `RUST_LOG` overrides `config.level`, e.g.
/// `RUST_LOG=bayropt_core::database=debug`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if LOGGING_INITIALIZED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = build_filter(config)?;
    let mut layers = vec![format_layer(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(format_layer(config.format, Mutex::new(file), false));
    }

    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(filter).with(layers))?;
    let _ = LOGGING_INITIALIZED.set(true);

    tracing::debug!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

#[must_use]
pub fn is_logging_initialized() -> bool {
    LOGGING_INITIALIZED.get().is_some()
}

/// Log levels accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Level for `-v` repetitions on top of `info`, or `quiet` for errors only.
    #[must_use]
    pub const fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Error;
        }
        match verbose {
            0 => Self::Info,
            1 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: {s}. Expected one of: trace, debug, info, warn, error"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Captures formatted output in a shared buffer.
    #[derive(Clone)]
    struct MockLogWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl MockLogWriter {
        fn new() -> Self {
            Self {
                buffer: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn contents(&self) -> String {
            String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for MockLogWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for MockLogWriter {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(format: LogFormat, emit: impl FnOnce()) -> String {
        let writer = MockLogWriter::new();
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(vec![format_layer(format, writer.clone(), false)]);
        tracing::subscriber::with_default(subscriber, emit);
        writer.contents()
    }

    #[test]
    fn json_events_carry_sample_fields() {
        let output = capture(LogFormat::Json, || {
            tracing::info!(hash = "ab12", sample = "run_7", "Registered sample in database");
        });
        let line = output.lines().find(|l| !l.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert_eq!(parsed["hash"], "ab12");
        assert_eq!(parsed["sample"], "run_7");
        assert_eq!(parsed["message"], "Registered sample in database");
    }

    #[test]
    fn json_events_include_current_span() {
        let output = capture(LogFormat::Json, || {
            let span = tracing::info_span!("evaluate", hash = "cd34");
            let _guard = span.enter();
            tracing::info!("inside span");
        });
        let line = output.lines().find(|l| !l.trim().is_empty()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["span"]["hash"], "cd34");
    }

    #[test]
    fn pretty_events_are_plain_text() {
        let output = capture(LogFormat::Pretty, || {
            tracing::info!(run_dir = "/tmp/run_1", "Starting pipeline run");
            tracing::debug!("filtered out");
        });
        assert!(output.contains("Starting pipeline run"));
        assert!(output.contains("run_dir"));
        assert!(!output.contains("filtered out"));
        assert!(!output.contains('\u{1b}'), "ansi escapes in {output:?}");
    }

    #[test]
    fn invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "bayropt=loud".to_string(),
            ..LogConfig::default()
        };
        assert!(matches!(build_filter(&config), Err(LogError::InvalidLevel(_))));
        assert!(build_filter(&LogConfig::default()).is_ok());
    }

    #[test]
    fn log_format_parse_and_display() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("Error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        let err = "verbose".parse::<LogLevel>().unwrap_err();
        assert!(err.contains("unknown log level: verbose"));
        assert!("".parse::<LogLevel>().is_err());
    }

    #[test]
    fn log_level_verbosity_and_ordering() {
        assert_eq!(LogLevel::from_verbosity(0, false), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(5, false), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(2, true), LogLevel::Error);
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(Level::from(LogLevel::Warn), Level::WARN);
        assert_eq!(LogLevel::Debug.as_str(), "debug");
    }

    #[test]
    fn log_config_serde_defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LogConfig::default());
        let config: LogConfig = serde_yaml::from_str("level: debug\nformat: json\n").unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none());
    }

    #[test]
    fn log_error_display() {
        assert_eq!(
            LogError::AlreadyInitialized.to_string(),
            "logging already initialized"
        );
        let err: LogError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.to_string().contains("failed to create log file"));
    }

    #[test]
    fn ensure_parent_dir_creates_nested() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("deep").join("bayropt.log");
        ensure_parent_dir(&path).unwrap();
        assert!(tmp.path().join("logs").join("deep").is_dir());
        ensure_parent_dir(Path::new("bayropt.log")).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn log_file_is_private() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("secure").join("bayropt.log");
        open_log_file(&path).unwrap();
        let dir_mode = std::fs::metadata(tmp.path().join("secure"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
