//! Anonymous shared mapping backing-device probe.
//!
//! Anonymous shared mappings are backed by a hidden tmpfs mount. Mapping a
//! scratch shared page and statting its `/proc/self/map_files` record
//! reveals that mount's device id, which later distinguishes such mappings
//! from maps of real tmpfs files.

use super::{kernel_err, PageGuard};
use crate::cache::FeatureCache;
use crate::sys::{KernelOps, Protection, Visibility};
use snap_common::{Result, RunOptions};
use tracing::info;

const PROBE: &str = "shmem-device";

/// Record the device backing anonymous shared mappings. This fact is
/// essential: any failure aborts the caller's sequence.
pub fn detect_shmem_device<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    _opts: &RunOptions,
) -> Result<()> {
    let page = PageGuard::map(kernel, Visibility::Shared, Protection::ReadWrite)
        .map_err(kernel_err(PROBE, "mmap"))?;

    let stat = kernel
        .stat_mapping_backing(page.addr())
        .map_err(kernel_err(PROBE, "stat map_files"))?;

    cache.set_shmem_device_id(stat.dev);
    info!(dev = format_args!("{:#x}", stat.dev), "found anon-shmem backing device");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::fake::FakeKernel;
    use crate::sys::FileStat;

    #[test]
    fn test_records_backing_device() {
        let kernel = FakeKernel::new();
        kernel.set_backing_stat(FileStat {
            dev: 0x2c,
            ino: 9,
            rdev: 0,
        });

        let mut cache = FeatureCache::new();
        detect_shmem_device(&mut cache, &kernel, &RunOptions::default()).unwrap();
        assert_eq!(cache.shmem_device_id(), Some(0x2c));
        assert_eq!(kernel.live_mappings(), 0);
    }

    #[test]
    fn test_mapping_failure_is_hard() {
        let mut kernel = FakeKernel::new();
        kernel.failures.map_shared = true;

        let mut cache = FeatureCache::new();
        let err = detect_shmem_device(&mut cache, &kernel, &RunOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            snap_common::Error::Kernel { probe: "shmem-device", op: "mmap", .. }
        ));
        assert_eq!(cache.shmem_device_id(), None);
    }

    #[test]
    fn test_backing_stat_failure_unmaps_scratch_page() {
        let mut kernel = FakeKernel::new();
        kernel.failures.stat_backing = true;

        let mut cache = FeatureCache::new();
        assert!(detect_shmem_device(&mut cache, &kernel, &RunOptions::default()).is_err());
        assert_eq!(kernel.live_mappings(), 0);
    }
}
