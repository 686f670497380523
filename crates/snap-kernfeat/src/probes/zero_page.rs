//! Zero-page frame number probe.
//!
//! Every demand-zero private read-only anonymous page is backed by the same
//! physical frame. Knowing its number lets the capture path recognize
//! never-written pages without reading their contents.

use super::{kernel_err, PageGuard};
use crate::cache::FeatureCache;
use crate::sys::{KernelOps, Protection, Visibility};
use snap_common::{Error, Result, RunOptions};
use tracing::info;

const PROBE: &str = "zero-page-pfn";

/// Map a read-only zero page and translate its address to a frame number.
///
/// Panics if the page does not read as zero: that is a broken kernel
/// invariant, not a recoverable condition.
pub fn detect_zero_page_pfn<K: KernelOps>(
    cache: &mut FeatureCache,
    kernel: &K,
    _opts: &RunOptions,
) -> Result<()> {
    let page = PageGuard::map(kernel, Visibility::Private, Protection::ReadOnly)
        .map_err(kernel_err(PROBE, "mmap"))?;

    let word = kernel
        .read_page_word(page.addr())
        .map_err(kernel_err(PROBE, "page read"))?;
    // Structural defect; aborting beats capturing garbage state.
    assert_eq!(word, 0, "demand-zero anonymous page read as {:#x}", word);

    let pfn = kernel
        .vaddr_to_pfn(page.addr())
        .map_err(kernel_err(PROBE, "pfn translation"))?;
    drop(page);

    if pfn == 0 {
        return Err(Error::ProbeUnresolved {
            probe: PROBE,
            reason: "address did not translate to a physical frame",
        });
    }

    cache.set_zero_page_frame_number(pfn);
    info!(pfn, "zero page frame number determined");
    Ok(())
}
