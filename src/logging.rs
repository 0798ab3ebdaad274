//! Arbeit logging system
//!
//! Structured logging through `tracing`. Tool output owns stdout, so the CLI
//! logs to stderr and the long-running `serve` loop logs to a file.

use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to output
    pub level: Level,
    /// Enable colored output
    pub color: bool,
    pub show_timestamps: bool,
    pub show_target: bool,
    /// Enable JSON format for machine parsing
    pub json_format: bool,
    pub enable_spans: bool,
    /// Daily-rolling log file, e.g. `~/.arbeit/logs/serve.log`
    pub file_output: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_mode(ApplicationMode::Cli)
    }
}

impl LoggingConfig {
    pub fn for_mode(mode: ApplicationMode) -> Self {
        match mode {
            ApplicationMode::ToolServer => Self {
                level: Level::INFO,
                color: false,
                show_timestamps: true,
                show_target: true,
                json_format: true,
                enable_spans: false,
                file_output: default_log_file("serve"),
            },
            ApplicationMode::Cli => Self {
                level: Level::WARN,
                color: io::IsTerminal::is_terminal(&io::stderr()),
                show_timestamps: false,
                show_target: false,
                json_format: false,
                enable_spans: false,
                file_output: None,
            },
            ApplicationMode::Test => Self {
                level: Level::DEBUG,
                color: false,
                show_timestamps: true,
                show_target: true,
                json_format: false,
                enable_spans: true,
                file_output: None,
            },
        }
    }

    /// Create config from CLI arguments. Each `-v` raises the level one step.
    pub fn from_args(quiet: bool, verbose: u8, json: bool) -> Self {
        let level = if quiet {
            Level::ERROR
        } else {
            match verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            }
        };

        Self {
            level,
            color: !quiet && !json && io::IsTerminal::is_terminal(&io::stderr()),
            show_timestamps: verbose > 0 || json,
            show_target: verbose > 1,
            json_format: json,
            enable_spans: verbose > 1,
            file_output: None,
        }
    }

    /// Apply `ARBEIT_LOG_LEVEL` and `ARBEIT_LOG_JSON` on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(level) = std::env::var("ARBEIT_LOG_LEVEL")
            .ok()
            .and_then(|value| parse_level(&value))
        {
            self.level = level;
        }
        if std::env::var("ARBEIT_LOG_JSON").as_deref() == Ok("true") {
            self.json_format = true;
            self.color = false;
        }
        self
    }
}

/// Application modes with different logging requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationMode {
    /// One-shot CLI invocation, human-readable stderr
    Cli,
    /// Line-delimited tool server, JSON log file
    ToolServer,
    /// Test mode - maximum detail for testing
    Test,
}

pub fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// `~/.arbeit/logs/<name>.log`, or `None` without a home directory.
pub fn default_log_file(name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".arbeit").join("logs").join(format!("{}.log", name)))
}

/// Initialize the logging system
pub fn init_logging(config: LoggingConfig) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("arbeit={}", config.level)));

    let registry = Registry::default().with(env_filter);

    if let Some(log_file) = config.file_output {
        let log_dir = log_file.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file path")
        })?;
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(
            log_dir,
            log_file.file_name().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file name")
            })?,
        );

        if config.json_format {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(config.enable_spans)
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(file_appender);
            json_layer.with_subscriber(registry).try_init().map_err(io::Error::other)?;
        } else {
            let fmt_layer = fmt::layer()
                .with_target(config.show_target)
                .with_level(true)
                .with_ansi(false)
                .with_writer(file_appender);
            fmt_layer
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_subscriber(registry)
                .try_init()
                .map_err(io::Error::other)?;
        }
    } else if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(config.enable_spans)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(io::stderr);
        json_layer.with_subscriber(registry).try_init().map_err(io::Error::other)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_level(true)
            .with_ansi(config.color)
            .with_writer(io::stderr);

        if config.show_timestamps {
            fmt_layer
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_subscriber(registry)
                .try_init()
                .map_err(io::Error::other)?;
        } else {
            fmt_layer.with_subscriber(registry).try_init().map_err(io::Error::other)?;
        }
    }

    Ok(())
}

/// Remove rotated log files (`<name>.log.YYYY-MM-DD`) older than `retention_days`.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> io::Result<usize> {
    use std::fs;
    use std::time::{Duration, SystemTime};

    if !log_dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let retention = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let mut removed = 0;

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.to_string_lossy().contains(".log.") || !path.is_file() {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        if now.duration_since(modified).is_ok_and(|age| age > retention) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!("Failed to remove old log file {}: {}", path.display(), e);
                },
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, "Log cleanup completed");
    }

    Ok(removed)
}

/// Log a mutating task operation.
#[macro_export]
macro_rules! log_task_operation {
    ($operation:expr, $task_id:expr) => {
        tracing::info!(operation = $operation, task_id = $task_id, "Task operation");
    };
    ($operation:expr, $task_id:expr, $details:expr) => {
        tracing::info!(
            operation = $operation,
            task_id = $task_id,
            details = $details,
            "Task operation"
        );
    };
}

/// Log a tool dispatch.
#[macro_export]
macro_rules! log_tool_call {
    ($tool:expr) => {
        tracing::debug!(tool = $tool, "Tool call");
    };
    ($tool:expr, $details:expr) => {
        tracing::debug!(tool = $tool, details = $details, "Tool call");
    };
}
