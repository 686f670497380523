//! Structured logging setup.
//!
//! Dual-mode output on stderr: human-readable console format for
//! interactive use, JSON lines for machine consumption. stdout stays
//! reserved for command payloads. Configured via `PROCSNAP_LOG` /
//! `RUST_LOG` and `PROCSNAP_LOG_FORMAT`, or CLI verbosity flags.

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "json" | "jsonl" | "machine" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl LogConfig {
    /// Resolve configuration from CLI verbosity flags and the environment.
    ///
    /// `-v` raises the level to debug, `-vv` to trace; `--quiet` drops it
    /// to errors only. `PROCSNAP_LOG_FORMAT` selects the output format.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            LogLevel::Error
        } else {
            match verbose {
                0 => LogLevel::Info,
                1 => LogLevel::Debug,
                _ => LogLevel::Trace,
            }
        };

        let format = std::env::var("PROCSNAP_LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default();

        Self { format, level }
    }
}

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. Respects
/// `PROCSNAP_LOG` and `RUST_LOG` over the configured level.
pub fn init_logging(config: &LogConfig) {
    let filter = std::env::var("PROCSNAP_LOG")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(format!("snap_kernfeat={}", config.level)));

    match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(use_ansi);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .json();
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(LogConfig::from_flags(0, false).level, LogLevel::Info);
        assert_eq!(LogConfig::from_flags(1, false).level, LogLevel::Debug);
        assert_eq!(LogConfig::from_flags(3, false).level, LogLevel::Trace);
        assert_eq!(LogConfig::from_flags(2, true).level, LogLevel::Error);
    }
}
