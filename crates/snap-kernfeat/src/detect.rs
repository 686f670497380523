//! Initialization sequences for the capture and restore paths.
//!
//! Each sequence is an ordered list of named probe steps run by a single
//! generic short-circuiting runner: the first failing step's error becomes
//! the sequence's error and no later step runs. Both sequences populate the
//! same injected [`FeatureCache`]; the consumer treats the cache as
//! read-only once its initializer has returned success.

use crate::cache::FeatureCache;
use crate::probes;
use crate::sys::KernelOps;
use snap_common::{Result, RunOptions};
use tracing::{debug, error, info};

type ProbeFn<K> = fn(&mut FeatureCache, &K, &RunOptions) -> Result<()>;

fn run_sequence<K: KernelOps>(
    label: &'static str,
    steps: &[(&'static str, ProbeFn<K>)],
    cache: &mut FeatureCache,
    kernel: &K,
    opts: &RunOptions,
) -> Result<()> {
    for (name, step) in steps {
        debug!(sequence = label, probe = name, "running probe");
        if let Err(err) = step(cache, kernel, opts) {
            error!(sequence = label, probe = name, error = %err, "probe failed");
            return Err(err);
        }
    }
    info!(sequence = label, "kernel feature detection complete");
    Ok(())
}

/// Populate the feature cache for the capture path.
///
/// Order: shmem backing device, soft-dirty tracking, zero-page frame
/// number, highest capability bit.
pub fn init_for_capture<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    opts: &RunOptions,
) -> Result<()> {
    let steps: [(&'static str, ProbeFn<K>); 4] = [
        ("shmem-device", probes::shmem::detect_shmem_device),
        ("dirty-tracking", probes::dirty::detect_dirty_tracking),
        ("zero-page-pfn", probes::zero_page::detect_zero_page_pfn),
        ("last-cap", probes::last_cap::detect_last_capability),
    ];
    run_sequence("capture", &steps, cache, kernel, opts)
}

/// Populate the feature cache for the restore path.
///
/// The TCP ceiling probe runs first: the sysctls it needs may be
/// unreachable once namespace isolation is established later in restore.
pub fn init_for_restore<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    opts: &RunOptions,
) -> Result<()> {
    let steps: [(&'static str, ProbeFn<K>); 3] = [
        ("tcp-limits", probes::tcp::detect_tcp_buffer_limits),
        ("last-cap", probes::last_cap::detect_last_capability),
        ("reclaimable-memfd", probes::memfd::detect_memfd_support),
    ];
    run_sequence("restore", &steps, cache, kernel, opts)
}
