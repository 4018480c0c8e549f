//! ELF64 loader and exec — SPEC_FULL.md §4.5.
//!
//! Parses a 64-bit little-endian ELF EXEC image, maps its PT_LOAD
//! segments into a fresh address space, and builds the initial SysV
//! user stack. The child's saved register context is seeded with the
//! real ELF entry point directly — no dummy-entry trampoline (see the
//! "ELF dummy entry then override rip" note under REDESIGN FLAGS).

use alloc::vec::Vec;
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::VirtAddr;

use crate::config::{MIN_STACK_HEADROOM, USER_STACK_SIZE, USER_STACK_TOP};
use crate::kernel::mm::user_paging::{self, MapFlags, VmmError};

/// Entry point and initial stack top produced by loading an ELF image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedProgram {
    pub entry_point: VirtAddr,
    pub stack_top: VirtAddr,
}

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EM_X86_64: u16 = 0x3e;
const ET_EXEC: u16 = 2;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PAGE_SIZE: u64 = 4096;

/// INVALID-FORMAT / IO-ERROR / STACK-TOO-SMALL (SPEC_FULL.md §7), scoped
/// to the ELF-loading step.
#[derive(Debug, Clone, Copy)]
pub enum ElfError {
    TooShort,
    InvalidFormat,
    BadProgramHeader,
    OutOfMemory,
    MapFailed,
    StackTooSmall,
}

impl From<VmmError> for ElfError {
    fn from(e: VmmError) -> Self {
        match e {
            VmmError::OutOfMemory => ElfError::OutOfMemory,
            _ => ElfError::MapFailed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    e_entry: u64,
    e_phoff: u64,
    e_phentsize: u16,
    e_phnum: u16,
}

#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

fn read_u16(data: &[u8], off: usize) -> Option<u16> {
    data.get(off..off + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], off: usize) -> Option<u32> {
    data.get(off..off + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(data: &[u8], off: usize) -> Option<u64> {
    data.get(off..off + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

/// Validates the ELF64 header: magic, 64-bit class, little-endian,
/// x86-64 machine, type EXEC (SPEC_FULL.md §4.5 step 2).
fn parse_header(data: &[u8]) -> Result<Elf64Header, ElfError> {
    if data.len() < 64 {
        return Err(ElfError::TooShort);
    }
    if data[0..4] != ELF_MAGIC {
        return Err(ElfError::InvalidFormat);
    }
    if data[4] != ELFCLASS64 || data[5] != ELFDATA2LSB {
        return Err(ElfError::InvalidFormat);
    }
    let e_type = read_u16(data, 16).ok_or(ElfError::TooShort)?;
    let e_machine = read_u16(data, 18).ok_or(ElfError::TooShort)?;
    if e_type != ET_EXEC || e_machine != EM_X86_64 {
        return Err(ElfError::InvalidFormat);
    }
    Ok(Elf64Header {
        e_entry: read_u64(data, 24).ok_or(ElfError::TooShort)?,
        e_phoff: read_u64(data, 32).ok_or(ElfError::TooShort)?,
        e_phentsize: read_u16(data, 54).ok_or(ElfError::TooShort)?,
        e_phnum: read_u16(data, 56).ok_or(ElfError::TooShort)?,
    })
}

fn program_headers(data: &[u8], header: &Elf64Header) -> Result<Vec<Elf64ProgramHeader>, ElfError> {
    let mut out = Vec::with_capacity(header.e_phnum as usize);
    for i in 0..header.e_phnum as usize {
        let off = header.e_phoff as usize + i * header.e_phentsize as usize;
        out.push(Elf64ProgramHeader {
            p_type: read_u32(data, off).ok_or(ElfError::BadProgramHeader)?,
            p_flags: read_u32(data, off + 4).ok_or(ElfError::BadProgramHeader)?,
            p_offset: read_u64(data, off + 8).ok_or(ElfError::BadProgramHeader)?,
            p_vaddr: read_u64(data, off + 16).ok_or(ElfError::BadProgramHeader)?,
            p_filesz: read_u64(data, off + 32).ok_or(ElfError::BadProgramHeader)?,
            p_memsz: read_u64(data, off + 40).ok_or(ElfError::BadProgramHeader)?,
        });
    }
    Ok(out)
}

#[inline]
fn align_down(x: u64) -> u64 {
    x & !(PAGE_SIZE - 1)
}

#[inline]
fn align_up(x: u64) -> u64 {
    (x + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Parses `data` as an ELF64 EXEC image, maps every PT_LOAD segment into
/// `root`'s address space, and maps a fresh zeroed user stack. Returns
/// the real entry point straight from the header (SPEC_FULL.md §4.5
/// steps 2, 5, 6). Does not build argv/envp — see `build_initial_stack`.
pub fn load_elf_image<A>(
    data: &[u8],
    root: PhysFrame,
    frame_allocator: &mut A,
) -> Result<LoadedProgram, ElfError>
where
    A: FrameAllocator<Size4KiB> + FrameDeallocator<Size4KiB>,
{
    let header = parse_header(data)?;
    let phdrs = program_headers(data, &header)?;
    let previous_root = user_paging::vmm_current();

    for ph in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        let file_end = ph
            .p_offset
            .checked_add(ph.p_filesz)
            .ok_or(ElfError::BadProgramHeader)?;
        if file_end as usize > data.len() || ph.p_filesz > ph.p_memsz {
            return Err(ElfError::BadProgramHeader);
        }

        let vaddr_aligned = VirtAddr::new(align_down(ph.p_vaddr));
        let end_aligned = align_up(ph.p_vaddr + ph.p_memsz);
        let size_aligned = end_aligned - vaddr_aligned.as_u64();

        let flags = MapFlags {
            writable: ph.p_flags & PF_W != 0,
            user: true,
            no_execute: ph.p_flags & PF_X == 0,
        };

        user_paging::vmm_map(root, vaddr_aligned, size_aligned, flags, frame_allocator)?;

        user_paging::vmm_switch(root);
        unsafe {
            let dst = ph.p_vaddr as *mut u8;
            let src = data.as_ptr().add(ph.p_offset as usize);
            core::ptr::copy_nonoverlapping(src, dst, ph.p_filesz as usize);
            if ph.p_memsz > ph.p_filesz {
                core::ptr::write_bytes(dst.add(ph.p_filesz as usize), 0, (ph.p_memsz - ph.p_filesz) as usize);
            }
        }
        user_paging::vmm_switch(previous_root);
    }

    let stack_top = VirtAddr::new(USER_STACK_TOP);
    let stack_bottom = stack_top - USER_STACK_SIZE;
    user_paging::vmm_map(root, stack_bottom, USER_STACK_SIZE, MapFlags::USER_RW, frame_allocator)?;
    user_paging::vmm_switch(root);
    unsafe { core::ptr::write_bytes(stack_bottom.as_u64() as *mut u8, 0, USER_STACK_SIZE as usize) };
    user_paging::vmm_switch(previous_root);

    Ok(LoadedProgram {
        entry_point: VirtAddr::new(header.e_entry),
        stack_top,
    })
}

/// The registers a freshly built initial stack expects to be seeded
/// into rdi/rsi/rdx/rsp (SPEC_FULL.md §6: "rdi=argc, rsi=argv, rdx=envp").
pub struct InitialStack {
    pub rsp: u64,
    pub argc: u64,
    pub argv: u64,
    pub envp: u64,
}

/// Writes argv/envp strings and NULL-terminated pointer arrays onto the
/// top of an already-mapped user stack in `root`'s address space
/// (SPEC_FULL.md §4.5 step 7 / §6 stack diagram). Fails with
/// `StackTooSmall` if fewer than `MIN_STACK_HEADROOM` bytes remain free
/// below the computed `rsp`.
pub fn build_initial_stack(
    root: PhysFrame,
    stack_top: VirtAddr,
    argv: &[&[u8]],
    envp: &[&[u8]],
) -> Result<InitialStack, ElfError> {
    let previous_root = user_paging::vmm_current();
    user_paging::vmm_switch(root);

    let result = (|| {
        let mut cursor = stack_top.as_u64();

        let mut env_ptrs = Vec::with_capacity(envp.len());
        for s in envp.iter().rev() {
            cursor -= s.len() as u64 + 1;
            unsafe {
                core::ptr::copy_nonoverlapping(s.as_ptr(), cursor as *mut u8, s.len());
                *((cursor + s.len() as u64) as *mut u8) = 0;
            }
            env_ptrs.push(cursor);
        }
        env_ptrs.reverse();

        let mut argv_ptrs = Vec::with_capacity(argv.len());
        for s in argv.iter().rev() {
            cursor -= s.len() as u64 + 1;
            unsafe {
                core::ptr::copy_nonoverlapping(s.as_ptr(), cursor as *mut u8, s.len());
                *((cursor + s.len() as u64) as *mut u8) = 0;
            }
            argv_ptrs.push(cursor);
        }
        argv_ptrs.reverse();

        cursor &= !7u64;

        cursor -= 8;
        unsafe { *(cursor as *mut u64) = 0 };
        for &p in env_ptrs.iter().rev() {
            cursor -= 8;
            unsafe { *(cursor as *mut u64) = p };
        }
        let envp_addr = cursor;

        cursor -= 8;
        unsafe { *(cursor as *mut u64) = 0 };
        for &p in argv_ptrs.iter().rev() {
            cursor -= 8;
            unsafe { *(cursor as *mut u64) = p };
        }
        let argv_addr = cursor;

        // No return address is pushed here (entry is via iretq, not
        // call), so rsp itself lands 16-byte aligned.
        cursor &= !15u64;

        let stack_bottom = stack_top.as_u64() - USER_STACK_SIZE;
        if cursor < stack_bottom + MIN_STACK_HEADROOM {
            return Err(ElfError::StackTooSmall);
        }

        Ok(InitialStack {
            rsp: cursor,
            argc: argv.len() as u64,
            argv: argv_addr,
            envp: envp_addr,
        })
    })();

    user_paging::vmm_switch(previous_root);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(e_type: u16, e_machine: u16) -> Vec<u8> {
        let mut h = alloc::vec![0u8; 64];
        h[0..4].copy_from_slice(&ELF_MAGIC);
        h[4] = ELFCLASS64;
        h[5] = ELFDATA2LSB;
        h[16..18].copy_from_slice(&e_type.to_le_bytes());
        h[18..20].copy_from_slice(&e_machine.to_le_bytes());
        h[24..32].copy_from_slice(&0x1000u64.to_le_bytes()); // e_entry
        h[32..40].copy_from_slice(&64u64.to_le_bytes()); // e_phoff
        h[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        h[56..58].copy_from_slice(&0u16.to_le_bytes()); // e_phnum
        h
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = minimal_header(ET_EXEC, EM_X86_64);
        data[0] = 0;
        assert!(matches!(parse_header(&data), Err(ElfError::InvalidFormat)));
    }

    #[test]
    fn rejects_wrong_machine() {
        let data = minimal_header(ET_EXEC, 0x28); // ARM
        assert!(matches!(parse_header(&data), Err(ElfError::InvalidFormat)));
    }

    #[test]
    fn accepts_valid_header() {
        let data = minimal_header(ET_EXEC, EM_X86_64);
        let header = parse_header(&data).expect("valid header");
        assert_eq!(header.e_entry, 0x1000);
        assert_eq!(header.e_phnum, 0);
    }

    #[test]
    fn rejects_truncated_header() {
        let data = alloc::vec![0u8; 10];
        assert!(matches!(parse_header(&data), Err(ElfError::TooShort)));
    }
}
