//! Reclaimable memory object support probe.
//!
//! `memfd_create(NULL, 0)` with deliberately malformed arguments: ENOSYS
//! means the kernel predates the call, EFAULT means the call exists and
//! rejected the NULL name, so the feature is supported. Anything else is
//! an unexpected condition and escalates.

use super::kernel_err;
use crate::cache::FeatureCache;
use crate::sys::{KernelOps, MemfdResponse};
use snap_common::{Error, Result, RunOptions};
use tracing::info;

const PROBE: &str = "reclaimable-memfd";

pub fn detect_memfd_support<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    _opts: &RunOptions,
) -> Result<()> {
    let response = kernel
        .probe_memfd_create()
        .map_err(kernel_err(PROBE, "memfd_create"))?;

    match response {
        MemfdResponse::Unsupported => {
            info!("memfd_create not implemented on this kernel");
            cache.set_reclaimable_memfd(false);
            Ok(())
        }
        MemfdResponse::Supported => {
            info!("memfd_create supported");
            cache.set_reclaimable_memfd(true);
            Ok(())
        }
        MemfdResponse::Unexpected(errno) => Err(Error::UnexpectedResponse {
            probe: PROBE,
            op: "memfd_create",
            errno,
        }),
    }
}
