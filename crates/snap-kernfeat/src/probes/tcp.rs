//! TCP buffer ceiling probe.
//!
//! Reads the host's `tcp_wmem`/`tcp_rmem` tuning triples and clamps the
//! cache's conservative default ceilings down to the host maxima. The
//! defaults (2 MiB write, 3 MiB read) are safe upper bounds; the restore
//! path later sizes socket buffers within them. The sysctls may be
//! unreachable inside a restricted namespace, which is why this probe runs
//! before namespace isolation is established, and why unavailability is a
//! soft condition rather than a failure.

use crate::cache::FeatureCache;
use crate::sys::{KernelOps, SysctlRequest};
use snap_common::{Result, RunOptions};
use tracing::{debug, warn};

/// Ceilings below this are almost certainly a misconfigured host; the
/// value is advisory tuning, not a contract.
const SUSPICIOUS_SHARE_FLOOR: u32 = 128;

pub fn detect_tcp_buffer_limits<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    _opts: &RunOptions,
) -> Result<()> {
    let mut wmem = [0u32; 3];
    let mut rmem = [0u32; 3];
    let mut reqs = [
        SysctlRequest::U32Triple {
            name: "net/ipv4/tcp_wmem",
            value: &mut wmem,
        },
        SysctlRequest::U32Triple {
            name: "net/ipv4/tcp_rmem",
            value: &mut rmem,
        },
    ];

    if let Err(err) = kernel.sysctl_read_batch(&mut reqs) {
        warn!(error = %err, "TCP memory sysctls unavailable, using defaults");
    } else {
        // The third element of each triple is the per-socket maximum.
        cache.clamp_tcp_shares(wmem[2], rmem[2]);

        if cache.tcp_max_write_share() < SUSPICIOUS_SHARE_FLOOR
            || cache.tcp_max_read_share() < SUSPICIOUS_SHARE_FLOOR
        {
            warn!(
                write = cache.tcp_max_write_share(),
                read = cache.tcp_max_read_share(),
                "memory limits for TCP queues are suspiciously small"
            );
        }
    }

    debug!(
        write = cache.tcp_max_write_share(),
        read = cache.tcp_max_read_share(),
        "TCP queue memory ceilings"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{TCP_MAX_READ_SHARE_DEFAULT, TCP_MAX_WRITE_SHARE_DEFAULT};
    use crate::sys::fake::FakeKernel;

    fn set_limits(kernel: &FakeKernel, wmax: u32, rmax: u32) {
        kernel.set_sysctl("net/ipv4/tcp_wmem", &[4096, 16384, wmax]);
        kernel.set_sysctl("net/ipv4/tcp_rmem", &[4096, 131_072, rmax]);
    }

    #[test]
    fn test_clamps_down_to_host_maxima() {
        let kernel = FakeKernel::new();
        set_limits(&kernel, 1 << 20, 3 << 19);

        let mut cache = FeatureCache::new();
        detect_tcp_buffer_limits(&mut cache, &kernel, &RunOptions::default()).unwrap();
        assert_eq!(cache.tcp_max_write_share(), 1 << 20);
        assert_eq!(cache.tcp_max_read_share(), 3 << 19);
    }

    #[test]
    fn test_never_raises_above_defaults() {
        let kernel = FakeKernel::new();
        set_limits(&kernel, 64 << 20, 64 << 20);

        let mut cache = FeatureCache::new();
        detect_tcp_buffer_limits(&mut cache, &kernel, &RunOptions::default()).unwrap();
        assert_eq!(cache.tcp_max_write_share(), TCP_MAX_WRITE_SHARE_DEFAULT);
        assert_eq!(cache.tcp_max_read_share(), TCP_MAX_READ_SHARE_DEFAULT);
    }

    #[test]
    fn test_unavailable_sysctls_keep_defaults_and_succeed() {
        let mut kernel = FakeKernel::new();
        kernel.failures.sysctl = true;

        let mut cache = FeatureCache::new();
        detect_tcp_buffer_limits(&mut cache, &kernel, &RunOptions::default()).unwrap();
        assert_eq!(cache.tcp_max_write_share(), TCP_MAX_WRITE_SHARE_DEFAULT);
        assert_eq!(cache.tcp_max_read_share(), TCP_MAX_READ_SHARE_DEFAULT);
    }

    #[test]
    fn test_tiny_ceilings_warn_but_do_not_abort() {
        let kernel = FakeKernel::new();
        set_limits(&kernel, 64, 64);

        let mut cache = FeatureCache::new();
        detect_tcp_buffer_limits(&mut cache, &kernel, &RunOptions::default()).unwrap();
        assert_eq!(cache.tcp_max_write_share(), 64);
        assert_eq!(cache.tcp_max_read_share(), 64);
    }
}
