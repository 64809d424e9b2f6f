//! Private task stacks.
//!
//! A stack is one heap region of `size + page_size()` bytes. The usable part
//! starts at the first page boundary inside the region, so the slack absorbs
//! whatever alignment the allocator returned.

use core::alloc::Layout;
use core::ptr::NonNull;
use x86_64::VirtAddr;

use super::{align, page_size};
use crate::error::Error;

/// Source of stack memory.
///
/// The scheduler only allocates from dispatcher context or with preemption
/// deferred, so implementations may take ordinary locks.
pub trait StackAllocator: Sync {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with the same layout,
    /// and must not be released twice.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Stacks from the process heap.
pub struct SystemStacks;

pub static SYSTEM_STACKS: SystemStacks = SystemStacks;

impl StackAllocator for SystemStacks {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

pub struct Stack {
    raw: NonNull<u8>,
    layout: Layout,
    base: VirtAddr,
    size: usize,
    allocator: &'static dyn StackAllocator,
}

impl Stack {
    /// Allocates `size` usable bytes plus one page of slack.
    pub fn allocate(allocator: &'static dyn StackAllocator, size: usize) -> Result<Self, Error> {
        let unit = page_size();
        let total = size.checked_add(unit).ok_or(Error::OutOfMemory)?;
        let layout = Layout::from_size_align(total, 16).map_err(|_| Error::OutOfMemory)?;
        let raw = allocator.allocate(layout).ok_or(Error::OutOfMemory)?;
        let base = align(VirtAddr::from_ptr(raw.as_ptr()), unit);

        Ok(Stack {
            raw,
            layout,
            base,
            size,
            allocator,
        })
    }

    /// Lowest usable address, page aligned.
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    /// One past the highest usable address; stacks grow down from here.
    pub fn top(&self) -> VirtAddr {
        self.base + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { self.allocator.release(self.raw, self.layout) }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("top", &self.top())
            .finish()
    }
}
