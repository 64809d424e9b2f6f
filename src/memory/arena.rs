// src/memory/arena.rs

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use linked_list_allocator::Heap;
use spin::Mutex;
use x86_64::VirtAddr;

use super::stack::StackAllocator;

/// Stack allocator over a fixed region, with allocation accounting.
///
/// Every allocation and release is counted, which lets a caller check that
/// a scheduler run returned each stack exactly once.
pub struct ArenaStacks {
    heap: Mutex<Heap>,
    bottom: VirtAddr,
    capacity: usize,
    allocations: AtomicUsize,
    releases: AtomicUsize,
    failures: AtomicUsize,
    bytes_in_use: AtomicUsize,
}

// The heap only hands out pointers into the region it was built over, and
// every access goes through the mutex.
unsafe impl Send for ArenaStacks {}
unsafe impl Sync for ArenaStacks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    pub capacity: usize,
    pub allocations: usize,
    pub releases: usize,
    pub failures: usize,
    pub bytes_in_use: usize,
}

impl ArenaStats {
    pub fn live(&self) -> usize {
        self.allocations - self.releases
    }
}

impl fmt::Display for ArenaStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} stacks live ({} allocated, {} released, {} refused), {}/{} bytes used ({}%)",
            self.live(),
            self.allocations,
            self.releases,
            self.failures,
            self.bytes_in_use,
            self.capacity,
            (self.bytes_in_use as f64 / self.capacity.max(1) as f64 * 100.0) as usize
        )
    }
}

impl ArenaStacks {
    /// Builds an arena over `region`, which it manages for the rest of the
    /// program.
    pub fn new(region: &'static mut [u8]) -> Self {
        let capacity = region.len();
        let bottom = VirtAddr::from_ptr(region.as_ptr());
        let heap = unsafe { Heap::new(region.as_mut_ptr(), capacity) };
        ArenaStacks {
            heap: Mutex::new(heap),
            bottom,
            capacity,
            allocations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            bytes_in_use: AtomicUsize::new(0),
        }
    }

    /// Allocates a `size`-byte region from the process heap and leaks an
    /// arena over it, ready to hand to the scheduler.
    pub fn leak(size: usize) -> &'static ArenaStacks {
        let region: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        Box::leak(Box::new(ArenaStacks::new(region)))
    }

    /// Whether `addr` lies inside the managed region.
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.bottom && addr < self.bottom + self.capacity
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity,
            allocations: self.allocations.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            bytes_in_use: self.bytes_in_use.load(Ordering::SeqCst),
        }
    }
}

impl StackAllocator for ArenaStacks {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        match self.heap.lock().allocate_first_fit(layout) {
            Ok(ptr) => {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                self.bytes_in_use.fetch_add(layout.size(), Ordering::SeqCst);
                Some(ptr)
            }
            Err(()) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe {
            self.heap.lock().deallocate(ptr, layout);
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.bytes_in_use.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}
