//! Scripted kernel double for probe tests.
//!
//! `FakeKernel` answers every [`KernelOps`] call from preconfigured state
//! and appends each call to an invocation log, so tests can assert both
//! outcomes and call ordering (e.g. the soft-dirty reset happening before
//! the first pagemap read) without a real kernel.

use super::{FileStat, KernelOps, MemfdResponse, Protection, SysctlRequest, Visibility};
use snap_common::{Error, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const FAKE_PAGE_SIZE: usize = 4096;

/// Scripted failures, all off by default.
#[derive(Debug, Default, Clone)]
pub struct FakeFailures {
    pub map_shared: bool,
    pub map_private: bool,
    pub stat_backing: bool,
    pub reset_dirty: bool,
    pub pagemap: bool,
    pub sysctl: bool,
}

/// In-memory [`KernelOps`] implementation with an invocation log.
#[derive(Debug, Default)]
pub struct FakeKernel {
    pub failures: FakeFailures,

    /// Entry returned for every pagemap read.
    pagemap_entry: Cell<u64>,
    /// First word of every "mapped" page.
    page_word: Cell<u32>,
    /// Response of the memfd_create probe.
    memfd_response: Cell<Option<MemfdResponse>>,
    /// Stat returned for the backing file of any mapping.
    backing_stat: Cell<FileStat>,

    /// Filesystem magic per path, for statfs queries.
    fs_types: RefCell<HashMap<PathBuf, i64>>,
    /// Stat result per path.
    path_stats: RefCell<HashMap<PathBuf, FileStat>>,
    /// Values per sysctl name.
    sysctl_values: RefCell<HashMap<String, Vec<u32>>>,

    next_addr: Cell<usize>,
    mapped: Cell<usize>,
    calls: RefCell<Vec<String>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        let kernel = Self::default();
        kernel.next_addr.set(0x7f00_0000_0000);
        kernel.memfd_response.set(Some(MemfdResponse::Supported));
        kernel.backing_stat.set(FileStat {
            dev: 0x23,
            ino: 1,
            rdev: 0,
        });
        kernel
    }

    /// Set the pagemap entry every read returns.
    pub fn set_pagemap_entry(&self, entry: u64) {
        self.pagemap_entry.set(entry);
    }

    /// Set the first word read back from any mapped page.
    pub fn set_page_word(&self, word: u32) {
        self.page_word.set(word);
    }

    pub fn set_memfd_response(&self, response: MemfdResponse) {
        self.memfd_response.set(Some(response));
    }

    pub fn set_backing_stat(&self, stat: FileStat) {
        self.backing_stat.set(stat);
    }

    pub fn set_fs_type(&self, path: &str, magic: i64) {
        self.fs_types
            .borrow_mut()
            .insert(PathBuf::from(path), magic);
    }

    pub fn set_path_stat(&self, path: &str, stat: FileStat) {
        self.path_stats
            .borrow_mut()
            .insert(PathBuf::from(path), stat);
    }

    pub fn set_sysctl(&self, name: &str, values: &[u32]) {
        self.sysctl_values
            .borrow_mut()
            .insert(name.to_string(), values.to_vec());
    }

    /// Full invocation log, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of logged calls whose name matches `op`.
    pub fn call_count(&self, op: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|entry| entry.split(':').next() == Some(op))
            .count()
    }

    /// Index of the first logged call matching `op`, if any.
    pub fn first_call_index(&self, op: &str) -> Option<usize> {
        self.calls
            .borrow()
            .iter()
            .position(|entry| entry.split(':').next() == Some(op))
    }

    /// Number of pages currently mapped and not yet unmapped.
    pub fn live_mappings(&self) -> usize {
        self.mapped.get()
    }

    fn log(&self, entry: impl Into<String>) {
        self.calls.borrow_mut().push(entry.into());
    }

    fn io_err(what: &str) -> Error {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, what.to_string()))
    }
}

impl KernelOps for FakeKernel {
    fn page_size(&self) -> usize {
        FAKE_PAGE_SIZE
    }

    fn map_anon_page(&self, visibility: Visibility, protection: Protection) -> Result<usize> {
        let kind = match visibility {
            Visibility::Private => "private",
            Visibility::Shared => "shared",
        };
        self.log(format!("map_anon:{}", kind));

        let fail = match visibility {
            Visibility::Private => self.failures.map_private,
            Visibility::Shared => self.failures.map_shared,
        };
        if fail {
            return Err(Self::io_err("scripted mmap failure"));
        }
        let _ = protection;

        let addr = self.next_addr.get();
        self.next_addr.set(addr + FAKE_PAGE_SIZE);
        self.mapped.set(self.mapped.get() + 1);
        Ok(addr)
    }

    fn unmap_page(&self, addr: usize) -> Result<()> {
        self.log(format!("unmap:{:x}", addr));
        self.mapped.set(self.mapped.get().saturating_sub(1));
        Ok(())
    }

    fn write_page_marker(&self, addr: usize) -> Result<()> {
        self.log(format!("write_marker:{:x}", addr));
        Ok(())
    }

    fn read_page_word(&self, addr: usize) -> Result<u32> {
        self.log(format!("read_word:{:x}", addr));
        Ok(self.page_word.get())
    }

    fn stat_mapping_backing(&self, addr: usize) -> Result<FileStat> {
        self.log(format!("stat_backing:{:x}", addr));
        if self.failures.stat_backing {
            return Err(Self::io_err("scripted map_files stat failure"));
        }
        Ok(self.backing_stat.get())
    }

    fn reset_dirty_tracking(&self) -> Result<()> {
        self.log("reset_dirty");
        if self.failures.reset_dirty {
            return Err(Self::io_err("scripted clear_refs failure"));
        }
        Ok(())
    }

    fn read_pagemap_entry(&self, addr: usize) -> Result<u64> {
        self.log(format!("read_pagemap:{:x}", addr));
        if self.failures.pagemap {
            return Err(Self::io_err("scripted pagemap read failure"));
        }
        Ok(self.pagemap_entry.get())
    }

    fn probe_memfd_create(&self) -> Result<MemfdResponse> {
        self.log("memfd_create");
        Ok(self
            .memfd_response
            .get()
            .unwrap_or(MemfdResponse::Unsupported))
    }

    fn filesystem_type(&self, path: &Path) -> Result<i64> {
        self.log(format!("statfs:{}", path.display()));
        self.fs_types
            .borrow()
            .get(path)
            .copied()
            .ok_or_else(|| Self::io_err("no scripted filesystem type"))
    }

    fn stat_path(&self, path: &Path) -> Result<FileStat> {
        self.log(format!("stat:{}", path.display()));
        self.path_stats
            .borrow()
            .get(path)
            .copied()
            .ok_or_else(|| Self::io_err("no scripted stat"))
    }

    fn sysctl_read_batch(&self, requests: &mut [SysctlRequest<'_>]) -> Result<()> {
        for req in requests.iter() {
            self.log(format!("sysctl:{}", req.name()));
        }
        if self.failures.sysctl {
            return Err(Error::SysctlRead {
                name: requests
                    .first()
                    .map(|r| r.name().to_string())
                    .unwrap_or_default(),
                source: std::io::ErrorKind::PermissionDenied.into(),
            });
        }

        // All-or-nothing: verify every name is scripted before writing.
        let values = self.sysctl_values.borrow();
        for req in requests.iter() {
            if !values.contains_key(req.name()) {
                return Err(Error::SysctlRead {
                    name: req.name().to_string(),
                    source: std::io::ErrorKind::NotFound.into(),
                });
            }
        }
        for req in requests.iter_mut() {
            match req {
                SysctlRequest::U32 { name, value } => {
                    **value = values[*name][0];
                }
                SysctlRequest::U32Triple { name, value } => {
                    value.copy_from_slice(&values[*name][..3]);
                }
            }
        }
        Ok(())
    }
}
