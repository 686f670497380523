//! Process-wide run options.
//!
//! The checkpoint/restore engine resolves these once at startup; the
//! detection probes read them but never modify them.

use serde::{Deserialize, Serialize};

/// Options fixed for the lifetime of a checkpoint/restore run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Incremental memory capture is mandatory for this run.
    ///
    /// When set, absence of soft-dirty tracking turns from a recorded fact
    /// into a hard failure of the capture-path initialization.
    pub track_memory: bool,
}

impl RunOptions {
    /// Options requiring soft-dirty support from the kernel.
    pub fn with_memory_tracking() -> Self {
        Self { track_memory: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_do_not_require_tracking() {
        assert!(!RunOptions::default().track_memory);
        assert!(RunOptions::with_memory_tracking().track_memory);
    }
}
