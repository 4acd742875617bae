//! Diagnostic SQL logger
//!
//! `SqlLogger` decides whether a statement is worth reporting (errors, slow
//! statements, or everything at `Info`) and formats a single line for it.
//! Lines go either to standard output or out as `tracing` events.

use anyhow::{anyhow, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

/// Target used for statement events when logging through `tracing`
pub const SQL_TARGET: &str = "lazydb::sql";

/// Default slow-statement threshold
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(1);

/// Local-time stamp on lines written to standard output
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

const RESET: &str = "\x1b[0m";
const RED_BOLD: &str = "\x1b[31;1m";
const YELLOW: &str = "\x1b[33m";
const BLUE_BOLD: &str = "\x1b[34;1m";
const MAGENTA: &str = "\x1b[35m";

/// Verbosity of the SQL logger, from quietest to loudest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Silent,
    #[default]
    Error,
    Warn,
    Info,
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            other => Err(anyhow!("Unknown log level '{}'", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Silent => write!(f, "silent"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
        }
    }
}

/// Where formatted log lines end up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Plain lines on standard output
    #[default]
    Stdout,
    /// `tracing` events under [`SQL_TARGET`]
    Tracing,
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "tracing" => Ok(LogOutput::Tracing),
            other => Err(anyhow!("Unknown log output '{}'", other)),
        }
    }
}

/// Logger behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub output: LogOutput,
    /// Statements running longer than this are reported as slow.
    /// A zero threshold disables slow reporting.
    pub slow_threshold: Duration,
    pub level: LogLevel,
    pub colorful: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            output: LogOutput::Stdout,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
            level: LogLevel::Error,
            colorful: true,
        }
    }
}

/// Kind of line a statement produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Error,
    Slow,
    Info,
}

/// Statement logger shared by the dialect and its pool
#[derive(Debug, Clone, Default)]
pub struct SqlLogger {
    config: LoggerConfig,
}

impl SqlLogger {
    pub fn new(config: LoggerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Decide which line, if any, a statement produces
    pub fn classify(&self, elapsed: Duration, failed: bool) -> Option<LineKind> {
        let level = self.config.level;
        let threshold = self.config.slow_threshold;

        if failed && level >= LogLevel::Error {
            Some(LineKind::Error)
        } else if !threshold.is_zero() && elapsed > threshold && level >= LogLevel::Warn {
            Some(LineKind::Slow)
        } else if level >= LogLevel::Info {
            Some(LineKind::Info)
        } else {
            None
        }
    }

    /// Format one statement line
    ///
    /// `[1.234ms] [rows:1] SELECT 1`, prefixed with the error or a
    /// `SLOW SQL >= 1s` marker depending on `kind`.
    pub fn format_line(
        &self,
        kind: LineKind,
        sql: &str,
        elapsed: Duration,
        rows: Option<usize>,
        err: Option<&dyn Display>,
    ) -> String {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let rows = rows
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());

        let prefix = match kind {
            LineKind::Error => err.map(|e| format!("error: {}", e)),
            LineKind::Slow => Some(format!("SLOW SQL >= {:?}", self.config.slow_threshold)),
            LineKind::Info => None,
        };

        if self.config.colorful {
            let head = match (kind, prefix) {
                (LineKind::Error, Some(p)) => format!("{}{}{} ", MAGENTA, p, RESET),
                (LineKind::Slow, Some(p)) => format!("{}{}{} ", RED_BOLD, p, RESET),
                _ => String::new(),
            };
            format!(
                "{}{}[{:.3}ms] {}[rows:{}]{} {}",
                head, YELLOW, ms, BLUE_BOLD, rows, RESET, sql
            )
        } else {
            let head = prefix.map(|p| format!("{} ", p)).unwrap_or_default();
            format!("{}[{:.3}ms] [rows:{}] {}", head, ms, rows, sql)
        }
    }

    /// Report a finished statement according to the configured level
    pub fn trace(
        &self,
        sql: &str,
        elapsed: Duration,
        rows: Option<usize>,
        err: Option<&dyn Display>,
    ) {
        let Some(kind) = self.classify(elapsed, err.is_some()) else {
            return;
        };

        match self.config.output {
            LogOutput::Stdout => {
                let line = self.format_line(kind, sql, elapsed, rows, err);
                let _ = writeln!(std::io::stdout().lock(), "{}", with_timestamp(&line));
            }
            LogOutput::Tracing => {
                let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
                match kind {
                    LineKind::Error => error!(
                        target: SQL_TARGET,
                        elapsed_ms,
                        rows,
                        error = %err.map(|e| e.to_string()).unwrap_or_default(),
                        "{}",
                        sql
                    ),
                    LineKind::Slow => warn!(
                        target: SQL_TARGET,
                        elapsed_ms,
                        rows,
                        threshold = ?self.config.slow_threshold,
                        "SLOW SQL: {}",
                        sql
                    ),
                    LineKind::Info => info!(target: SQL_TARGET, elapsed_ms, rows, "{}", sql),
                }
            }
        }
    }
}

/// Prefix a stdout line with a line break and the local time
pub fn with_timestamp(line: &str) -> String {
    format!("\r\n{} {}", Local::now().format(TIMESTAMP_FORMAT), line)
}

/// Run `f` with a subscriber that records every event, and return the output
#[cfg(test)]
pub(crate) fn capture_events(f: impl FnOnce()) -> String {
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
