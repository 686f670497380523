//! Detected kernel feature cache.
//!
//! [`FeatureCache`] holds every fact the probes extract from the running
//! kernel. It is created with static defaults, written by the probes during
//! the single-threaded initialization window, and read-only afterwards.
//! Each field is written at most once per process lifetime; the TCP ceilings
//! may additionally only ever move downward from their defaults.

use crate::sys::{FileStat, KernelOps, DEVPTS_SUPER_MAGIC, TMPFS_MAGIC};
use serde::{Deserialize, Serialize};
use snap_common::Error;
use std::path::Path;
use tracing::error;

/// Safe default ceiling for a single TCP socket send buffer (2 MiB).
pub const TCP_MAX_WRITE_SHARE_DEFAULT: u32 = 2 << 20;

/// Safe default ceiling for a single TCP socket receive buffer (3 MiB).
pub const TCP_MAX_READ_SHARE_DEFAULT: u32 = 3 << 20;

/// Facts about the running kernel, populated by the detection probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCache {
    /// Device backing purely anonymous shared mappings (the hidden tmpfs
    /// mount), used to tell them apart from mappings of real tmpfs files.
    shmem_device_id: Option<u64>,

    /// Kernel reports soft-dirty bits in pagemap entries.
    has_dirty_tracking: bool,

    /// Physical frame number backing every demand-zero read-only anonymous
    /// page; 0 means not determined.
    zero_page_frame_number: u64,

    /// Highest valid capability index reported by the kernel.
    last_capability_bit: Option<u32>,

    /// Kernel supports creating reclaimable anonymous memory objects.
    has_reclaimable_memfd: bool,

    /// Ceiling applied to a restored TCP socket's send buffer, in bytes.
    /// Starts at a safe upper bound and is only ever decreased.
    tcp_max_write_share: u32,

    /// Ceiling applied to a restored TCP socket's receive buffer, in bytes.
    tcp_max_read_share: u32,

    /// Lazily populated per-filesystem stat entries.
    #[serde(skip)]
    fs_stat: FsStatCache,
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self {
            shmem_device_id: None,
            has_dirty_tracking: false,
            zero_page_frame_number: 0,
            last_capability_bit: None,
            has_reclaimable_memfd: false,
            tcp_max_write_share: TCP_MAX_WRITE_SHARE_DEFAULT,
            tcp_max_read_share: TCP_MAX_READ_SHARE_DEFAULT,
            fs_stat: FsStatCache::new(),
        }
    }
}

impl FeatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shmem_device_id(&self) -> Option<u64> {
        self.shmem_device_id
    }

    pub fn has_dirty_tracking(&self) -> bool {
        self.has_dirty_tracking
    }

    pub fn zero_page_frame_number(&self) -> u64 {
        self.zero_page_frame_number
    }

    pub fn last_capability_bit(&self) -> Option<u32> {
        self.last_capability_bit
    }

    pub fn has_reclaimable_memfd(&self) -> bool {
        self.has_reclaimable_memfd
    }

    pub fn tcp_max_write_share(&self) -> u32 {
        self.tcp_max_write_share
    }

    pub fn tcp_max_read_share(&self) -> u32 {
        self.tcp_max_read_share
    }

    /// Cached stat of a distinguished filesystem mount, populating the
    /// entry on first use. Returns `None` when the mount is absent or not
    /// of the expected kind on this host.
    pub fn fs_stat<K: KernelOps>(&mut self, kind: FsKind, kernel: &K) -> Option<FileStat> {
        self.fs_stat.lookup(kind, kernel)
    }

    /// Filesystem kinds whose stat entry has been populated so far.
    pub fn fs_stats_populated(&self) -> Vec<FsKind> {
        self.fs_stat.populated()
    }

    pub(crate) fn set_shmem_device_id(&mut self, dev: u64) {
        self.shmem_device_id = Some(dev);
    }

    pub(crate) fn set_dirty_tracking(&mut self, available: bool) {
        self.has_dirty_tracking = available;
    }

    pub(crate) fn set_zero_page_frame_number(&mut self, pfn: u64) {
        self.zero_page_frame_number = pfn;
    }

    pub(crate) fn set_last_capability_bit(&mut self, cap: u32) {
        self.last_capability_bit = Some(cap);
    }

    pub(crate) fn set_reclaimable_memfd(&mut self, supported: bool) {
        self.has_reclaimable_memfd = supported;
    }

    /// Clamp the TCP ceilings to the host-reported maxima. The defaults are
    /// safe upper bounds, so host values can only lower them.
    pub(crate) fn clamp_tcp_shares(&mut self, write_max: u32, read_max: u32) {
        self.tcp_max_write_share = self.tcp_max_write_share.min(write_max);
        self.tcp_max_read_share = self.tcp_max_read_share.min(read_max);
    }
}

/// Distinguished filesystem kinds the engine needs identification data for.
///
/// The key space is a closed enum, so an out-of-range kind cannot reach the
/// lookup in the first place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsKind {
    /// Pseudo-terminal filesystem, mounted at /dev/pts.
    Devpts,
    /// Device tmpfs, mounted at /dev.
    DevTmpfs,
}

impl FsKind {
    /// Every distinguished filesystem kind, in lookup-table order.
    pub const ALL: [FsKind; 2] = [FsKind::Devpts, FsKind::DevTmpfs];

    fn index(self) -> usize {
        match self {
            FsKind::Devpts => 0,
            FsKind::DevTmpfs => 1,
        }
    }
}

#[derive(Debug, Clone)]
struct FsStatEntry {
    name: &'static str,
    path: &'static str,
    magic: i64,
    /// Explicit populated marker; `None` means never successfully queried,
    /// so "queried and legitimately zero" can never be conflated with it.
    stat: Option<FileStat>,
}

/// Lazily populated stat table for distinguished filesystem mounts.
///
/// Each entry is trusted only after its mount's type magic matched the
/// expected one; a mismatch is reported and the entry stays unpopulated.
#[derive(Debug, Clone)]
pub struct FsStatCache {
    entries: [FsStatEntry; 2],
}

impl Default for FsStatCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FsStatCache {
    pub fn new() -> Self {
        Self {
            entries: [
                FsStatEntry {
                    name: "devpts",
                    path: "/dev/pts",
                    magic: DEVPTS_SUPER_MAGIC,
                    stat: None,
                },
                FsStatEntry {
                    name: "devtmpfs",
                    path: "/dev",
                    magic: TMPFS_MAGIC,
                    stat: None,
                },
            ],
        }
    }

    /// Look up identification data for `kind`, querying the filesystem on
    /// first use and answering from the cache afterwards. A failed
    /// population is reported with its stable error code and yields no
    /// result; the entry stays unpopulated so a later lookup re-verifies.
    pub fn lookup<K: KernelOps>(&mut self, kind: FsKind, kernel: &K) -> Option<FileStat> {
        let entry = &mut self.entries[kind.index()];
        if let Some(stat) = entry.stat {
            return Some(stat);
        }

        match Self::populate(entry, kernel) {
            Ok(stat) => {
                entry.stat = Some(stat);
                Some(stat)
            }
            Err(err) => {
                error!(filesystem = entry.name, path = entry.path,
                    code = err.code(), error = %err,
                    "filesystem stat lookup failed");
                None
            }
        }
    }

    fn populate<K: KernelOps>(entry: &FsStatEntry, kernel: &K) -> Result<FileStat, Error> {
        let path = Path::new(entry.path);
        let fs_type = kernel.filesystem_type(path)?;
        if fs_type != entry.magic {
            return Err(Error::FilesystemMismatch {
                name: entry.name,
                path: entry.path,
            });
        }
        kernel.stat_path(path)
    }

    /// Kinds with a populated entry, for diagnostics.
    pub fn populated(&self) -> Vec<FsKind> {
        FsKind::ALL
            .into_iter()
            .filter(|kind| self.entries[kind.index()].stat.is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::fake::FakeKernel;

    #[test]
    fn test_defaults() {
        let cache = FeatureCache::new();
        assert_eq!(cache.shmem_device_id(), None);
        assert!(!cache.has_dirty_tracking());
        assert_eq!(cache.zero_page_frame_number(), 0);
        assert_eq!(cache.last_capability_bit(), None);
        assert!(!cache.has_reclaimable_memfd());
        assert_eq!(cache.tcp_max_write_share(), 2 << 20);
        assert_eq!(cache.tcp_max_read_share(), 3 << 20);
    }

    #[test]
    fn test_tcp_shares_never_increase() {
        let mut cache = FeatureCache::new();
        cache.clamp_tcp_shares(64 << 20, 64 << 20);
        assert_eq!(cache.tcp_max_write_share(), TCP_MAX_WRITE_SHARE_DEFAULT);
        assert_eq!(cache.tcp_max_read_share(), TCP_MAX_READ_SHARE_DEFAULT);

        cache.clamp_tcp_shares(1 << 20, 1 << 20);
        assert_eq!(cache.tcp_max_write_share(), 1 << 20);
        assert_eq!(cache.tcp_max_read_share(), 1 << 20);
    }

    #[test]
    fn test_fs_stat_populates_once() {
        let kernel = FakeKernel::new();
        kernel.set_fs_type("/dev/pts", DEVPTS_SUPER_MAGIC);
        kernel.set_path_stat(
            "/dev/pts",
            FileStat {
                dev: 0x18,
                ino: 1,
                rdev: 0,
            },
        );

        let mut cache = FsStatCache::new();
        let first = cache.lookup(FsKind::Devpts, &kernel).expect("populated");
        assert_eq!(first.dev, 0x18);
        assert_eq!(kernel.call_count("statfs"), 1);

        // Second lookup answers from the cache without re-querying.
        let second = cache.lookup(FsKind::Devpts, &kernel).expect("cached");
        assert_eq!(second, first);
        assert_eq!(kernel.call_count("statfs"), 1);
        assert_eq!(kernel.call_count("stat"), 1);
        assert_eq!(cache.populated(), vec![FsKind::Devpts]);
    }

    #[test]
    fn test_fs_stat_magic_mismatch_yields_filesystem_error() {
        let kernel = FakeKernel::new();
        kernel.set_fs_type("/dev", 0x9fa0);

        let cache = FsStatCache::new();
        let err = FsStatCache::populate(&cache.entries[FsKind::DevTmpfs.index()], &kernel)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::FilesystemMismatch {
                name: "devtmpfs",
                path: "/dev",
            }
        ));
        assert_eq!(err.code(), 30);
        assert_eq!(err.category(), snap_common::ErrorCategory::Filesystem);
    }

    #[test]
    fn test_fs_stat_magic_mismatch_is_reported_miss() {
        let kernel = FakeKernel::new();
        // /dev mounted as something other than tmpfs.
        kernel.set_fs_type("/dev", 0x9fa0);

        let mut cache = FsStatCache::new();
        assert!(cache.lookup(FsKind::DevTmpfs, &kernel).is_none());
        assert!(cache.populated().is_empty());

        // The entry stays unpopulated, so a later lookup re-verifies.
        assert!(cache.lookup(FsKind::DevTmpfs, &kernel).is_none());
        assert_eq!(kernel.call_count("statfs"), 2);
    }

    #[test]
    fn test_fs_stat_absent_mount_is_miss_not_crash() {
        let kernel = FakeKernel::new();
        let mut cache = FsStatCache::new();
        assert!(cache.lookup(FsKind::Devpts, &kernel).is_none());
    }
}
