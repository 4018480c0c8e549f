// src/kernel/mm/user_paging.rs
//! Virtual memory manager (VMM) — SPEC_FULL.md §4.2.
//!
//! Builds and mutates the 4-level x86_64 page tables that back one
//! process's address space: `vmm_new_address_space`, `vmm_map`,
//! `vmm_unmap`, `vmm_switch`, `vmm_current`, `vmm_destroy`, plus
//! `duplicate_user_page_table` for `fork`.
//!
//! The kernel half (PML4 entries 256..511) is never touched by any
//! function here except to copy it once at address-space creation time —
//! it stays bit-identical across every address space, by reference.

use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{
    FrameAllocator, FrameDeallocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags,
    PhysFrame, Size4KiB,
};
use x86_64::VirtAddr;

pub use crate::config::{USER_CODE_BASE, USER_STACK_SIZE, USER_STACK_TOP};

/// First PML4 index belonging to the kernel half (entries 256..511).
const KERNEL_PML4_START: usize = 256;

/// Permission flags a caller can request for `vmm_map`, independent of the
/// architecture's own bit layout (SPEC_FULL.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    pub writable: bool,
    pub user: bool,
    pub no_execute: bool,
}

impl MapFlags {
    pub const KERNEL_RW: Self = Self { writable: true, user: false, no_execute: true };
    pub const KERNEL_RX: Self = Self { writable: false, user: false, no_execute: false };
    pub const USER_RW: Self = Self { writable: true, user: true, no_execute: true };
    pub const USER_RX: Self = Self { writable: false, user: true, no_execute: false };

    fn to_page_table_flags(self) -> PageTableFlags {
        let mut flags = PageTableFlags::PRESENT;
        if self.writable {
            flags |= PageTableFlags::WRITABLE;
        }
        if self.user {
            flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        if self.no_execute {
            flags |= PageTableFlags::NO_EXECUTE;
        }
        flags
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VmmError {
    OutOfMemory,
    AlreadyMapped,
    NotMapped,
    InvalidAddress,
}

/// Returns the physical-memory direct-map offset recorded at boot.
fn phys_offset() -> VirtAddr {
    super::phys_mem_offset()
}

fn pml4_ptr(frame: PhysFrame) -> *mut PageTable {
    (phys_offset() + frame.start_address().as_u64()).as_mut_ptr()
}

/// Build a mapper over an arbitrary PML4 frame's table.
///
/// # Safety
/// `frame` must contain a valid, live PML4 mapped via the physical direct
/// map, and must not be concurrently mutated by anyone else.
pub(crate) unsafe fn mapper_for(frame: PhysFrame) -> OffsetPageTable<'static> {
    let table = unsafe { &mut *pml4_ptr(frame) };
    unsafe { OffsetPageTable::new(table, phys_offset()) }
}

/// `vmm_new_address_space` — allocate a PML4, zero it, copy the kernel
/// half from the currently active PML4. The user half starts empty.
pub fn vmm_new_address_space<A>(frame_allocator: &mut A) -> Result<PhysFrame, VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    let frame = frame_allocator.allocate_frame().ok_or(VmmError::OutOfMemory)?;
    let table = unsafe { &mut *pml4_ptr(frame) };
    table.zero();

    let (active_frame, _) = Cr3::read();
    let active = unsafe { &*pml4_ptr(active_frame) };
    for i in KERNEL_PML4_START..512 {
        table[i] = active[i].clone();
    }

    Ok(frame)
}

/// `vmm_map` — ensure `[vaddr, vaddr+size)` is mapped in `root` with
/// `flags`, rounding `size` up to page granularity. Rolls back on
/// mid-mapping frame-allocation failure.
pub fn vmm_map<A>(
    root: PhysFrame,
    vaddr: VirtAddr,
    size: u64,
    flags: MapFlags,
    frame_allocator: &mut A,
) -> Result<(), VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    debug_assert!(
        !(flags.writable && !flags.user && vaddr.as_u64() >= 0xFFFF_8000_0000_0000),
        "refusing WRITABLE+USER mapping request targeting the kernel half"
    );

    let mut mapper = unsafe { mapper_for(root) };
    let start_page = Page::<Size4KiB>::containing_address(vaddr);
    let end_addr = vaddr + size.max(1) - 1u64;
    let end_page = Page::<Size4KiB>::containing_address(end_addr);
    let page_table_flags = flags.to_page_table_flags();

    let mut mapped_pages = alloc::vec::Vec::new();
    for page in Page::range_inclusive(start_page, end_page) {
        let frame = match frame_allocator.allocate_frame() {
            Some(f) => f,
            None => {
                for p in mapped_pages {
                    if let Ok((f, _)) = mapper.unmap(p) {
                        unsafe { frame_allocator.deallocate_frame(f) };
                    }
                }
                return Err(VmmError::OutOfMemory);
            }
        };
        match unsafe { mapper.map_to(page, frame, page_table_flags, frame_allocator) } {
            Ok(flush) => {
                flush.flush();
                mapped_pages.push(page);
            }
            Err(_) => {
                unsafe { frame_allocator.deallocate_frame(frame) };
                for p in mapped_pages {
                    if let Ok((f, _)) = mapper.unmap(p) {
                        unsafe { frame_allocator.deallocate_frame(f) };
                    }
                }
                return Err(VmmError::AlreadyMapped);
            }
        }
    }

    Ok(())
}

/// `vmm_unmap` — tear down mappings in `[vaddr, vaddr+size)`, returning
/// their frames to the allocator. Pages that were never mapped are
/// silently skipped (best-effort, matches the teacher's `unmap` callers).
pub fn vmm_unmap<A>(root: PhysFrame, vaddr: VirtAddr, size: u64, frame_allocator: &mut A)
where
    A: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
{
    let mut mapper = unsafe { mapper_for(root) };
    let start_page = Page::<Size4KiB>::containing_address(vaddr);
    let end_addr = vaddr + size.max(1) - 1u64;
    let end_page = Page::<Size4KiB>::containing_address(end_addr);

    for page in Page::range_inclusive(start_page, end_page) {
        if let Ok((frame, flush)) = mapper.unmap(page) {
            flush.flush();
            unsafe { frame_allocator.deallocate_frame(frame) };
        }
    }
}

/// `vmm_switch` — install `root` as the active address space.
pub fn vmm_switch(root: PhysFrame) {
    let (current, flags) = Cr3::read();
    if current != root {
        unsafe { Cr3::write(root, flags) };
    }
}

/// `vmm_current` — the currently active PML4 frame.
pub fn vmm_current() -> PhysFrame {
    Cr3::read().0
}

/// `vmm_destroy` — free every user-half data frame and intermediate
/// table page reachable from `root`, then free `root` itself. The kernel
/// half is never touched: entries 256..511 are shared, not owned.
pub fn vmm_destroy<A>(root: PhysFrame, frame_allocator: &mut A)
where
    A: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
{
    let offset = phys_offset();
    let l4 = unsafe { &*pml4_ptr(root) };

    for l4_idx in 0..KERNEL_PML4_START {
        let l4_entry = &l4[l4_idx];
        if l4_entry.is_unused() {
            continue;
        }
        let l3_frame = l4_entry.frame().expect("present PML4 entry without frame");
        free_table_recursive(l3_frame, offset, 2, frame_allocator);
    }

    // Free the root itself. Safe to re-read as mutable now that all
    // children are gone; we only need the frame value.
    unsafe { frame_allocator.deallocate_frame(root) };
}

/// Recursively frees a page-table page and everything it reaches.
/// `level` counts down from 2 (PDPT) through 0 (PT, whose entries are
/// data frames rather than further tables).
fn free_table_recursive<A>(frame: PhysFrame, offset: VirtAddr, level: u8, frame_allocator: &mut A)
where
    A: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
{
    let table = unsafe { &*((offset + frame.start_address().as_u64()).as_ptr::<PageTable>()) };
    for entry in table.iter() {
        if entry.is_unused() {
            continue;
        }
        let child = entry.frame().expect("present entry without frame");
        if level == 0 {
            unsafe { frame_allocator.deallocate_frame(child) };
        } else {
            free_table_recursive(child, offset, level - 1, frame_allocator);
        }
    }
    unsafe { frame_allocator.deallocate_frame(frame) };
}

/// `duplicate_user_page_table` — walk the currently active address
/// space's user half and copy every mapped frame byte-for-byte into a
/// freshly allocated frame in a new address space. Used by `fork`
/// (true duplication, not copy-on-write; see DESIGN.md).
///
/// # Safety
/// The caller's address space (as named by `dummy_mapper`, which must
/// wrap the currently active PML4) must be stable for the duration of
/// the call — i.e. called from kernel context with no concurrent
/// mutation, which cooperative scheduling guarantees.
pub unsafe fn duplicate_user_page_table<A>(
    _dummy_mapper: &mut OffsetPageTable<'_>,
    frame_allocator: &mut A,
    physical_memory_offset: VirtAddr,
) -> Result<PhysFrame, VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    let new_root = vmm_new_address_space(frame_allocator)?;
    let mut new_mapper = unsafe { mapper_for(new_root) };

    let (active_frame, _) = Cr3::read();
    let active = unsafe { &*pml4_ptr(active_frame) };

    for l4_idx in 0..KERNEL_PML4_START {
        if active[l4_idx].is_unused() {
            continue;
        }
        let l3_frame = active[l4_idx].frame().unwrap();
        walk_and_copy(
            l3_frame,
            2,
            (l4_idx as u64) << 39,
            physical_memory_offset,
            &mut new_mapper,
            frame_allocator,
        )?;
    }

    Ok(new_root)
}

/// Recursively walks a source page-table subtree, copying every leaf
/// data frame into a freshly allocated frame mapped at the same
/// virtual address in `new_mapper`.
fn walk_and_copy<A>(
    frame: PhysFrame,
    level: u8,
    base_vaddr: u64,
    offset: VirtAddr,
    new_mapper: &mut OffsetPageTable<'_>,
    frame_allocator: &mut A,
) -> Result<(), VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    let table = unsafe { &*((offset + frame.start_address().as_u64()).as_ptr::<PageTable>()) };
    let shift = 12 + 9 * level as u64;

    for (idx, entry) in table.iter().enumerate() {
        if entry.is_unused() {
            continue;
        }
        let child_vaddr = base_vaddr | ((idx as u64) << shift);
        let child_frame = entry.frame().ok_or(VmmError::InvalidAddress)?;

        if level == 0 {
            let new_frame = frame_allocator.allocate_frame().ok_or(VmmError::OutOfMemory)?;
            unsafe {
                let src = (offset + child_frame.start_address().as_u64()).as_ptr::<u8>();
                let dst = (offset + new_frame.start_address().as_u64()).as_mut_ptr::<u8>();
                core::ptr::copy_nonoverlapping(src, dst, 4096);
            }
            let page = Page::<Size4KiB>::containing_address(VirtAddr::new(child_vaddr));
            unsafe {
                new_mapper
                    .map_to(page, new_frame, entry.flags(), frame_allocator)
                    .map_err(|_| VmmError::AlreadyMapped)?
                    .flush();
            }
        } else {
            walk_and_copy(child_frame, level - 1, child_vaddr, offset, new_mapper, frame_allocator)?;
        }
    }

    Ok(())
}

/// Map a code image of `code.len()` bytes at `entry_point`, copying its
/// bytes in. Used by the bootstrap loader for the embedded `init` image;
/// the general ELF loader (`kernel::process::elf`) calls `vmm_map`
/// directly per-segment instead.
///
/// # Safety
/// `mapper` must address a page table that is either currently active or
/// about to be switched to before any of the mapped pages are touched
/// from user mode.
pub unsafe fn map_user_code<A>(
    mapper: &mut OffsetPageTable<'_>,
    code: &[u8],
    entry_point: VirtAddr,
    frame_allocator: &mut A,
) -> Result<(), VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    let base = VirtAddr::new(USER_CODE_BASE);
    let size = code.len() as u64;
    let start_page = Page::<Size4KiB>::containing_address(base);
    let end_page = Page::<Size4KiB>::containing_address(base + size.max(1) - 1u64);
    let flags = MapFlags::USER_RX.to_page_table_flags();

    for page in Page::range_inclusive(start_page, end_page) {
        let frame = frame_allocator.allocate_frame().ok_or(VmmError::OutOfMemory)?;
        unsafe {
            mapper
                .map_to(page, frame, flags, frame_allocator)
                .map_err(|_| VmmError::AlreadyMapped)?
                .flush();
        }
    }

    let offset = phys_offset();
    for (i, page) in Page::<Size4KiB>::range_inclusive(start_page, end_page).enumerate() {
        let frame = mapper.translate_page(page).map_err(|_| VmmError::NotMapped)?;
        let dst = unsafe { (offset + frame.start_address().as_u64()).as_mut_ptr::<u8>() };
        let page_off = i * 4096;
        let copy_len = core::cmp::min(4096, code.len().saturating_sub(page_off));
        if copy_len > 0 {
            unsafe {
                core::ptr::copy_nonoverlapping(code.as_ptr().add(page_off), dst, copy_len);
            }
        }
    }

    let _ = entry_point;
    Ok(())
}

/// Map a fresh, zeroed user stack of `size` bytes ending at
/// `USER_STACK_TOP`. Returns the initial `rsp` (top of stack).
///
/// # Safety
/// See `map_user_code`.
pub unsafe fn map_user_stack<A>(
    mapper: &mut OffsetPageTable<'_>,
    size: u64,
    frame_allocator: &mut A,
) -> Result<VirtAddr, VmmError>
where
    A: FrameAllocator<Size4KiB>,
{
    let top = VirtAddr::new(USER_STACK_TOP);
    let bottom = top - size;
    let start_page = Page::<Size4KiB>::containing_address(bottom);
    let end_page = Page::<Size4KiB>::containing_address(top - 1u64);
    let flags = MapFlags::USER_RW.to_page_table_flags();

    for page in Page::range_inclusive(start_page, end_page) {
        let frame = frame_allocator.allocate_frame().ok_or(VmmError::OutOfMemory)?;
        unsafe {
            mapper
                .map_to(page, frame, flags, frame_allocator)
                .map_err(|_| VmmError::AlreadyMapped)?
                .flush();
        }
        let offset = phys_offset();
        let dst = unsafe { (offset + frame.start_address().as_u64()).as_mut_ptr::<u8>() };
        unsafe { core::ptr::write_bytes(dst, 0, 4096) };
    }

    let _ = size;
    Ok(top)
}

