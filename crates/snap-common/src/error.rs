//! Error types for procsnap.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Structured JSON serialization for automation
//!
//! Probe failures are never retried: an environment fact is assumed stable
//! for the process lifetime, so an error here means the current kernel or
//! namespace cannot support the requested operation. Structural defects
//! (broken kernel invariants) are not modeled as errors at all; they abort
//! the process at the detection site.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for procsnap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A detection probe failed against the running kernel.
    Probe,
    /// A system-control parameter read failed.
    Sysctl,
    /// A distinguished filesystem is absent or of the wrong type.
    Filesystem,
    /// File I/O and serialization errors.
    Io,
    /// The kernel lacks a feature the current run options require.
    Unsupported,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Probe => write!(f, "probe"),
            ErrorCategory::Sysctl => write!(f, "sysctl"),
            ErrorCategory::Filesystem => write!(f, "filesystem"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Unified error type for procsnap.
#[derive(Error, Debug)]
pub enum Error {
    // Probe errors (10-19)
    #[error("{op} failed in {probe} probe: {source}")]
    Kernel {
        probe: &'static str,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected errno {errno} from {op} in {probe} probe")]
    UnexpectedResponse {
        probe: &'static str,
        op: &'static str,
        errno: i32,
    },

    #[error("{probe} probe could not resolve a result: {reason}")]
    ProbeUnresolved {
        probe: &'static str,
        reason: &'static str,
    },

    // Sysctl errors (20-29)
    #[error("sysctl read of {name} failed: {source}")]
    SysctlRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sysctl {name} has malformed value {value:?}")]
    SysctlParse { name: String, value: String },

    // Filesystem errors (30-39)
    #[error("{name} is not mounted at {path}")]
    FilesystemMismatch {
        name: &'static str,
        path: &'static str,
    },

    // I/O errors (40-49)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Unsupported-feature errors (50-59)
    #[error("memory tracking is required but soft-dirty is unavailable")]
    TrackingUnavailable,
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Probe errors
    /// - 20-29: Sysctl errors
    /// - 30-39: Filesystem errors
    /// - 40-49: I/O errors
    /// - 50-59: Unsupported-feature errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Kernel { .. } => 10,
            Error::UnexpectedResponse { .. } => 11,
            Error::ProbeUnresolved { .. } => 12,
            Error::SysctlRead { .. } => 20,
            Error::SysctlParse { .. } => 21,
            Error::FilesystemMismatch { .. } => 30,
            Error::Io(_) => 40,
            Error::Json(_) => 41,
            Error::TrackingUnavailable => 50,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Kernel { .. }
            | Error::UnexpectedResponse { .. }
            | Error::ProbeUnresolved { .. } => ErrorCategory::Probe,

            Error::SysctlRead { .. } | Error::SysctlParse { .. } => ErrorCategory::Sysctl,

            Error::FilesystemMismatch { .. } => ErrorCategory::Filesystem,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,

            Error::TrackingUnavailable => ErrorCategory::Unsupported,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Kernel { .. } => "Kernel Interaction Failed",
            Error::UnexpectedResponse { .. } => "Unexpected Kernel Response",
            Error::ProbeUnresolved { .. } => "Probe Unresolved",
            Error::SysctlRead { .. } => "Sysctl Read Failed",
            Error::SysctlParse { .. } => "Malformed Sysctl Value",
            Error::FilesystemMismatch { .. } => "Filesystem Mismatch",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::TrackingUnavailable => "Memory Tracking Unavailable",
        }
    }
}

/// Structured error response for JSON output.
///
/// Used by machine-facing callers for parseable error reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Additional structured context (e.g., probe name, sysctl name).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::Kernel { probe, op, .. } => {
                context.insert("probe".to_string(), serde_json::json!(probe));
                context.insert("op".to_string(), serde_json::json!(op));
            }
            Error::UnexpectedResponse { probe, op, errno } => {
                context.insert("probe".to_string(), serde_json::json!(probe));
                context.insert("op".to_string(), serde_json::json!(op));
                context.insert("errno".to_string(), serde_json::json!(errno));
            }
            Error::ProbeUnresolved { probe, .. } => {
                context.insert("probe".to_string(), serde_json::json!(probe));
            }
            Error::SysctlRead { name, .. } | Error::SysctlParse { name, .. } => {
                context.insert("sysctl".to_string(), serde_json::json!(name));
            }
            Error::FilesystemMismatch { name, path } => {
                context.insert("filesystem".to_string(), serde_json::json!(name));
                context.insert("path".to_string(), serde_json::json!(path));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, reset) = if use_color {
        ("\x1b[31m", "\x1b[0m")
    } else {
        ("", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}",
        red = red,
        reset = reset,
        headline = err.headline(),
        message = err,
    )
}
