//! Process-wide log sink

use crate::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt as fmt_layer, prelude::*, EnvFilter};

/// Environment variables that switch the log to stderr at debug level
pub const DEBUG_ENV: [&str; 2] = ["RECONBASE_DEBUG", "DEBUG"];

static INSTALLED: OnceLock<LogTarget> = OnceLock::new();

/// Minimum severity of logged messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`. `tracing` has no fatal level.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub target: LogTarget,
    pub level: LogLevel,
}

impl LogOptions {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: LogTarget::File(path.into()),
            level: LogLevel::Info,
        }
    }

    pub fn stderr(level: LogLevel) -> Self {
        Self {
            target: LogTarget::Stderr,
            level,
        }
    }

    /// Log to `path` at info, or to stderr at debug when a debug variable is set
    pub fn from_env(path: impl Into<PathBuf>) -> Self {
        if DEBUG_ENV.iter().any(|name| std::env::var_os(name).is_some()) {
            Self::stderr(LogLevel::Debug)
        } else {
            Self::file(path)
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

/// Install the log sink once per process.
///
/// Returns `false` when a sink was already installed, by an earlier call or
/// by the embedding application. `RUST_LOG` takes precedence over the level.
pub fn init(options: &LogOptions) -> Result<bool> {
    if INSTALLED.get().is_some() {
        return Ok(false);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.level.as_directive()));

    let installed = match &options.target {
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::fs::File::create(path)?;
            tracing_subscriber::registry()
                .with(
                    fmt_layer::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false)
                        .with_filter(filter),
                )
                .try_init()
                .is_ok()
        }
        LogTarget::Stderr => tracing_subscriber::registry()
            .with(
                fmt_layer::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            )
            .try_init()
            .is_ok(),
    };

    // A subscriber owned by someone else counts as configured too
    let _ = INSTALLED.set(options.target.clone());
    if installed {
        tracing::debug!("Logging to {:?} at {}", options.target, options.level);
    }
    Ok(installed)
}

/// Whether a log sink has been installed through [`init`]
pub fn is_initialized() -> bool {
    INSTALLED.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Fatal);
        assert_eq!(LogLevel::Fatal.as_directive(), "error");
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("fatal".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_init_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions::file(dir.path().join("database.log"));

        init(&options).unwrap();
        assert!(is_initialized());
        assert!(!init(&options).unwrap());
    }
}
