// src/memory/mod.rs
use lazy_static::lazy_static;
use x86_64::VirtAddr;
use x86_64::structures::paging::{PageSize, Size4KiB};

pub mod arena;
pub mod stack;

pub use arena::{ArenaStacks, ArenaStats};
pub use stack::{Stack, StackAllocator, SystemStacks, SYSTEM_STACKS};

lazy_static! {
    static ref PAGE_SIZE: usize = query_page_size();
}

fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 && (size as usize).is_power_of_two() {
        size as usize
    } else {
        log::warn!("[mem] sysconf(_SC_PAGESIZE) failed, assuming 4 KiB pages");
        Size4KiB::SIZE as usize
    }
}

/// Natural alignment granularity of the platform.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Returns the smallest address >= `addr` that is a multiple of `unit`.
///
/// `unit` must be a power of two.
pub fn align(addr: VirtAddr, unit: usize) -> VirtAddr {
    assert!(unit.is_power_of_two(), "alignment unit {} is not a power of two", unit);
    addr.align_up(unit as u64)
}
