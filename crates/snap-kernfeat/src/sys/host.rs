//! Host kernel implementation of [`KernelOps`].
//!
//! Raw mapping calls go through libc; everything that has a `/proc`
//! interface (pagemap, clear_refs, map_files, sysctl) is plain file I/O.

use super::{FileStat, KernelOps, MemfdResponse, Protection, SysctlRequest, Visibility};
use snap_common::{Error, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// Directly probes the kernel this process runs on.
#[derive(Debug, Clone)]
pub struct HostKernel {
    page_size: usize,
}

impl HostKernel {
    pub fn new() -> Self {
        // SAFETY: sysconf with a valid name has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: if page_size > 0 {
                page_size as usize
            } else {
                4096
            },
        }
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelOps for HostKernel {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn map_anon_page(&self, visibility: Visibility, protection: Protection) -> Result<usize> {
        let prot = match protection {
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };
        let flags = libc::MAP_ANONYMOUS
            | match visibility {
                Visibility::Private => libc::MAP_PRIVATE,
                Visibility::Shared => libc::MAP_SHARED,
            };

        // SAFETY: anonymous mapping with no fixed address; the kernel picks
        // the range and nothing else references it yet.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.page_size,
                prot,
                flags,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        trace!(addr = addr as usize, ?visibility, ?protection, "mapped scratch page");
        Ok(addr as usize)
    }

    fn unmap_page(&self, addr: usize) -> Result<()> {
        // SAFETY: addr came from map_anon_page and is unmapped exactly once.
        let rc = unsafe { libc::munmap(addr as *mut libc::c_void, self.page_size) };
        if rc != 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn write_page_marker(&self, addr: usize) -> Result<()> {
        // SAFETY: addr is a live writable page owned by the calling probe.
        unsafe { std::ptr::write_volatile(addr as *mut u8, 0) };
        Ok(())
    }

    fn read_page_word(&self, addr: usize) -> Result<u32> {
        // SAFETY: addr is a live readable page owned by the calling probe.
        Ok(unsafe { std::ptr::read_volatile(addr as *const u32) })
    }

    fn stat_mapping_backing(&self, addr: usize) -> Result<FileStat> {
        let path = format!(
            "/proc/self/map_files/{:x}-{:x}",
            addr,
            addr + self.page_size
        );
        self.stat_path(Path::new(&path))
    }

    fn reset_dirty_tracking(&self) -> Result<()> {
        // Writing "4" clears the soft-dirty bit on every page of the task.
        fs::write("/proc/self/clear_refs", b"4")?;
        Ok(())
    }

    fn read_pagemap_entry(&self, addr: usize) -> Result<u64> {
        let mut file = fs::File::open("/proc/self/pagemap")?;
        let offset = (addr / self.page_size) as u64 * 8;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn probe_memfd_create(&self) -> Result<MemfdResponse> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: deliberately malformed arguments; the kernel rejects
            // the call before touching any state.
            let rc = unsafe {
                libc::syscall(libc::SYS_memfd_create, std::ptr::null::<libc::c_char>(), 0)
            };
            if rc >= 0 {
                // A NULL name must not succeed; treat a live fd as unexpected.
                // SAFETY: rc is a freshly created descriptor we own.
                unsafe { libc::close(rc as libc::c_int) };
                return Ok(MemfdResponse::Unexpected(0));
            }
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            Ok(match errno {
                libc::ENOSYS => MemfdResponse::Unsupported,
                libc::EFAULT => MemfdResponse::Supported,
                other => MemfdResponse::Unexpected(other),
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            Ok(MemfdResponse::Unsupported)
        }
    }

    fn filesystem_type(&self, path: &Path) -> Result<i64> {
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::ffi::OsStrExt;
            let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
                .map_err(|_| Error::Io(std::io::ErrorKind::InvalidInput.into()))?;
            let mut fst: libc::statfs = unsafe { std::mem::zeroed() };
            // SAFETY: c_path is NUL-terminated and fst is a plain-data out
            // parameter of the right type.
            let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut fst) };
            if rc != 0 {
                return Err(Error::Io(std::io::Error::last_os_error()));
            }
            Ok(fst.f_type as i64)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = path;
            Err(Error::Io(std::io::ErrorKind::Unsupported.into()))
        }
    }

    fn stat_path(&self, path: &Path) -> Result<FileStat> {
        use std::os::unix::fs::MetadataExt;
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            dev: meta.dev(),
            ino: meta.ino(),
            rdev: meta.rdev(),
        })
    }

    fn sysctl_read_batch(&self, requests: &mut [SysctlRequest<'_>]) -> Result<()> {
        // Stage every value first so a failing read leaves no destination
        // half-written.
        let mut staged: Vec<Vec<u32>> = Vec::with_capacity(requests.len());
        for req in requests.iter() {
            let name = req.name();
            let expected = match req {
                SysctlRequest::U32 { .. } => 1,
                SysctlRequest::U32Triple { .. } => 3,
            };
            staged.push(read_sysctl_values(name, expected)?);
        }

        for (req, values) in requests.iter_mut().zip(staged) {
            match req {
                SysctlRequest::U32 { value, .. } => **value = values[0],
                SysctlRequest::U32Triple { value, .. } => {
                    value.copy_from_slice(&values);
                }
            }
        }
        Ok(())
    }
}

/// Read `/proc/sys/<name>` and parse exactly `expected` u32 fields.
fn read_sysctl_values(name: &str, expected: usize) -> Result<Vec<u32>> {
    let path = format!("/proc/sys/{}", name);
    let raw = fs::read_to_string(&path).map_err(|source| Error::SysctlRead {
        name: name.to_string(),
        source,
    })?;

    let values: Vec<u32> = raw
        .split_whitespace()
        .map(|field| field.parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::SysctlParse {
            name: name.to_string(),
            value: raw.trim().to_string(),
        })?;

    if values.len() != expected {
        return Err(Error::SysctlParse {
            name: name.to_string(),
            value: raw.trim().to_string(),
        });
    }
    Ok(values)
}
