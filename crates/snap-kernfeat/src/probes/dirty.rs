//! Soft-dirty tracking probe.
//!
//! Determines whether pagemap entries carry the soft-dirty bit, which the
//! capture path uses for incremental memory snapshots. The per-task
//! soft-dirty state must be reset before the first pagemap read: some
//! kernel versions only start reporting the bit after at least one reset.

use super::{kernel_err, PageGuard};
use crate::cache::FeatureCache;
use crate::sys::{KernelOps, Protection, Visibility, PAGEMAP_SOFT_DIRTY};
use snap_common::{Error, Result, RunOptions};
use tracing::{error, info};

const PROBE: &str = "dirty-tracking";

/// Probe for soft-dirty support by dirtying a scratch page and reading its
/// pagemap entry back. Absence is recorded unless the run options make
/// memory tracking mandatory, in which case it is a hard failure.
pub fn detect_dirty_tracking<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    opts: &RunOptions,
) -> Result<()> {
    // Reset first; ordering is part of the recipe.
    kernel
        .reset_dirty_tracking()
        .map_err(kernel_err(PROBE, "clear_refs write"))?;

    let page = PageGuard::map(kernel, Visibility::Private, Protection::ReadWrite)
        .map_err(kernel_err(PROBE, "mmap"))?;

    kernel
        .write_page_marker(page.addr())
        .map_err(kernel_err(PROBE, "page write"))?;

    let entry = kernel
        .read_pagemap_entry(page.addr())
        .map_err(kernel_err(PROBE, "pagemap read"))?;

    if entry & PAGEMAP_SOFT_DIRTY != 0 {
        info!("soft-dirty tracking supported on this kernel");
        cache.set_dirty_tracking(true);
    } else {
        info!("soft-dirty tracking is OFF");
        cache.set_dirty_tracking(false);
        if opts.track_memory {
            error!("memory tracking requested but not available");
            return Err(Error::TrackingUnavailable);
        }
    }

    Ok(())
}
