//! procsnap common types.
//!
//! This crate provides foundational types shared across procsnap crates:
//! - Structured error types with stable codes and categories
//! - Process-wide run options consumed by the detection probes

pub mod error;
pub mod options;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use options::RunOptions;
