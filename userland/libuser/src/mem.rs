//! Memory management API

use crate::syscall;

/// Memory protection flags
pub const PROT_READ: u64 = 1;
pub const PROT_WRITE: u64 = 2;
pub const PROT_EXEC: u64 = 4;

/// Memory mapping flags
pub const MAP_PRIVATE: u64 = 1;
pub const MAP_ANONYMOUS: u64 = 2;

/// Allocate memory using mmap
///
/// Returns the address of the allocated region on success, or the kernel's
/// negative error code on failure.
pub fn alloc(size: u64) -> Result<u64, i64> {
    mmap(0, size, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS)
}

/// Deallocate memory using munmap
pub fn dealloc(addr: u64, size: u64) -> Result<(), i64> {
    let ret = syscall::munmap(addr, size);
    if ret < 0 {
        Err(ret)
    } else {
        Ok(())
    }
}

/// Map memory with specific protection and flags
pub fn mmap(addr: u64, len: u64, prot: u64, flags: u64) -> Result<u64, i64> {
    let ret = syscall::mmap(addr, len, prot, flags);
    if ret < 0 {
        Err(ret)
    } else {
        Ok(ret as u64)
    }
}
