//! File logging for the trip engine.
//!
//! # Responsibility
//! - Start one rotating `flexi_logger` file sink per process from an
//!   [`EngineConfig`].
//! - Capture panics as a single sanitized `panic_captured` line.
//!
//! # Invariants
//! - A second start with the same level and directory is accepted; any other
//!   target is a [`LoggingError::Conflict`].
//! - Log lines carry ids, versions and reason codes only; user-authored text
//!   (poll questions, task titles, addresses) never reaches the log file.

use crate::config::EngineConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "tripsync";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_ROTATED_FILES: usize = 5;
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE_SINK: OnceCell<ActiveSink> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Level and directory a file sink writes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub level: &'static str,
    pub log_dir: PathBuf,
}

struct ActiveSink {
    target: LogTarget,
    _handle: LoggerHandle,
}

/// What [`init_logging`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingActivation {
    /// The config names no `log_dir`; nothing was started.
    Disabled,
    Started,
    /// A sink with the same target was already running.
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    InvalidLevel(String),
    InvalidDirectory { path: PathBuf, message: String },
    Conflict { active: LogTarget, requested: LogTarget },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidDirectory { path, message } => {
                write!(f, "invalid log directory `{}`: {message}", path.display())
            }
            Self::Conflict { active, requested } => write!(
                f,
                "logging already writes `{}` to `{}`; refusing `{}` at `{}`",
                active.level,
                active.log_dir.display(),
                requested.level,
                requested.log_dir.display()
            ),
            Self::Backend(message) => write!(f, "failed to start file logger: {message}"),
        }
    }
}

impl Error for LoggingError {}

/// Starts file logging as described by `config`.
///
/// # Errors
/// - [`LoggingError::InvalidLevel`] / [`LoggingError::InvalidDirectory`] for
///   unusable settings; the directory must be absolute.
/// - [`LoggingError::Conflict`] when a sink with another target is running.
/// - [`LoggingError::Backend`] when `flexi_logger` fails to start.
pub fn init_logging(config: &EngineConfig) -> Result<LoggingActivation, LoggingError> {
    let Some(log_dir) = config.log_dir.as_deref() else {
        return Ok(LoggingActivation::Disabled);
    };
    let requested = LogTarget {
        level: parse_level(&config.log_level)?,
        log_dir: absolute_dir(log_dir)?,
    };

    let mut started = false;
    let sink = ACTIVE_SINK.get_or_try_init(|| {
        started = true;
        start_sink(requested.clone())
    })?;
    if sink.target != requested {
        return Err(LoggingError::Conflict {
            active: sink.target.clone(),
            requested,
        });
    }
    Ok(if started {
        LoggingActivation::Started
    } else {
        LoggingActivation::AlreadyActive
    })
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::InvalidLevel(other.to_string())),
    }
}

fn absolute_dir(path: &Path) -> Result<PathBuf, LoggingError> {
    if path.as_os_str().is_empty() || !path.is_absolute() {
        return Err(LoggingError::InvalidDirectory {
            path: path.to_path_buf(),
            message: "must be a non-empty absolute path".to_string(),
        });
    }
    Ok(path.to_path_buf())
}

fn start_sink(target: LogTarget) -> Result<ActiveSink, LoggingError> {
    std::fs::create_dir_all(&target.log_dir).map_err(|err| LoggingError::InvalidDirectory {
        path: target.log_dir.clone(),
        message: err.to_string(),
    })?;

    let handle = Logger::try_with_str(target.level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(target.log_dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_start module=core status=ok level={} version={} os={}",
        target.level,
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    );

    Ok(ActiveSink {
        target,
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            single_line(&payload, PANIC_PAYLOAD_LIMIT)
        );
        previous(info);
    }));
}

/// Flattens `value` to one line of at most `limit` characters plus an ellipsis.
fn single_line(value: &str, limit: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut cut: String = flat.chars().take(limit).collect();
    cut.push_str("...");
    cut
}
