//! Primitive kernel query layer.
//!
//! Every raw interaction a probe performs goes through the [`KernelOps`]
//! trait: mapping scratch pages, reading pagemap entries, statting the
//! hidden backing file of a mapping, batch sysctl reads. Probe decision
//! logic stays testable against [`fake::FakeKernel`] while production code
//! runs against [`HostKernel`].

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
mod host;

pub use host::HostKernel;

use snap_common::Result;
use std::path::Path;

/// Pagemap entry bit: page is present in RAM.
pub const PAGEMAP_PRESENT: u64 = 1 << 63;

/// Pagemap entry bit: page written since the last soft-dirty reset.
pub const PAGEMAP_SOFT_DIRTY: u64 = 1 << 55;

/// Pagemap entry mask covering the physical frame number (bits 0-54).
pub const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

/// Filesystem type magic for devpts (`/dev/pts`).
pub const DEVPTS_SUPER_MAGIC: i64 = 0x1cd1;

/// Filesystem type magic for tmpfs, which also backs devtmpfs mounts.
pub const TMPFS_MAGIC: i64 = 0x0102_1994;

/// Visibility of an anonymous mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Shared,
}

/// Protection of an anonymous mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

/// Subset of `stat(2)` results the probes and fs-stat cache rely on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileStat {
    /// Device containing the file.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Device identifier, for device special files.
    pub rdev: u64,
}

/// Classified outcome of the `memfd_create(NULL, 0)` support probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemfdResponse {
    /// The syscall is not implemented (ENOSYS).
    Unsupported,
    /// The syscall exists and rejected the NULL name (EFAULT).
    Supported,
    /// Any other response; the caller treats this as a hard failure.
    Unexpected(i32),
}

/// One request in a batch sysctl read.
///
/// Names use `/` separators relative to the sysctl root, e.g.
/// `net/ipv4/tcp_wmem`. A batch either populates every destination or
/// fails as a whole.
#[derive(Debug)]
pub enum SysctlRequest<'a> {
    /// A single 32-bit value.
    U32 { name: &'a str, value: &'a mut u32 },
    /// A fixed three-element tuning triple (min, default, max).
    U32Triple {
        name: &'a str,
        value: &'a mut [u32; 3],
    },
}

impl SysctlRequest<'_> {
    pub fn name(&self) -> &str {
        match self {
            SysctlRequest::U32 { name, .. } => name,
            SysctlRequest::U32Triple { name, .. } => name,
        }
    }
}

/// Raw kernel interactions consumed by the detection probes.
///
/// Implementations must not retain state across calls on behalf of the
/// probes; resource scoping (unmapping pages, closing descriptors) is the
/// caller's responsibility via [`crate::probes::PageGuard`].
pub trait KernelOps {
    /// Size of one page on this kernel.
    fn page_size(&self) -> usize;

    /// Map one zero-filled anonymous page, returning its address.
    fn map_anon_page(&self, visibility: Visibility, protection: Protection) -> Result<usize>;

    /// Unmap a page previously returned by [`Self::map_anon_page`].
    fn unmap_page(&self, addr: usize) -> Result<()>;

    /// Write one byte into a mapped page to mark it modified.
    fn write_page_marker(&self, addr: usize) -> Result<()>;

    /// Read the first word of a mapped page.
    fn read_page_word(&self, addr: usize) -> Result<u32>;

    /// Stat the backing file of the process's own mapping at `addr`
    /// (the `/proc/self/map_files` record for that address range).
    fn stat_mapping_backing(&self, addr: usize) -> Result<FileStat>;

    /// Reset soft-dirty state for every page of the current process.
    fn reset_dirty_tracking(&self) -> Result<()>;

    /// Read the pagemap entry describing the page at `addr`.
    fn read_pagemap_entry(&self, addr: usize) -> Result<u64>;

    /// Translate a virtual address to the physical frame number backing it.
    ///
    /// Returns 0 when the pagemap reports the page as not present; the
    /// caller decides whether that is a failure.
    fn vaddr_to_pfn(&self, addr: usize) -> Result<u64> {
        let entry = self.read_pagemap_entry(addr)?;
        if entry & PAGEMAP_PRESENT == 0 {
            return Ok(0);
        }
        Ok(entry & PAGEMAP_PFN_MASK)
    }

    /// Invoke `memfd_create(NULL, 0)` and classify the errno.
    fn probe_memfd_create(&self) -> Result<MemfdResponse>;

    /// Return the filesystem type magic of the mount at `path`.
    fn filesystem_type(&self, path: &Path) -> Result<i64>;

    /// Stat a path.
    fn stat_path(&self, path: &Path) -> Result<FileStat>;

    /// Read an ordered batch of sysctl parameters, all-or-nothing.
    fn sysctl_read_batch(&self, requests: &mut [SysctlRequest<'_>]) -> Result<()>;
}
