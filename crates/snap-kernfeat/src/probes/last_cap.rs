//! Highest-capability-bit probe.
//!
//! A single scalar sysctl read of `kernel/cap_last_cap`. Runs in both
//! initialization sequences and is idempotent.

use crate::cache::FeatureCache;
use crate::sys::{KernelOps, SysctlRequest};
use snap_common::{Result, RunOptions};
use tracing::debug;

pub fn detect_last_capability<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    _opts: &RunOptions,
) -> Result<()> {
    let mut last_cap = 0u32;
    let mut reqs = [SysctlRequest::U32 {
        name: "kernel/cap_last_cap",
        value: &mut last_cap,
    }];
    kernel.sysctl_read_batch(&mut reqs)?;

    cache.set_last_capability_bit(last_cap);
    debug!(last_cap, "highest valid capability bit");
    Ok(())
}
