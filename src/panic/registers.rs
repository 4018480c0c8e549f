//! Register capture and RBP-chain stack trace for the panic dump
//! (SPEC_FULL.md §4.7/§10: "general-purpose and control registers
//! (CR0/CR2/CR3/CR4), and an RBP-chain stack trace bounded to 20 frames
//! with frame-pointer sanity checks").

use x86_64::registers::control::{Cr0, Cr2, Cr3, Cr4};

/// Bound on the RBP-chain walk, matching the contract above.
const MAX_STACK_FRAMES: usize = 20;

/// Frame pointers below this are never a legitimate kernel/user stack
/// address (the first megabyte is reserved/real-mode memory).
const MIN_SANE_FRAME_POINTER: u64 = 0x10_0000;

/// Frame pointers above this aren't canonical user-space addresses
/// either (the non-canonical hole starts here on current x86-64).
const MAX_SANE_FRAME_POINTER: u64 = 0x0000_7FFF_FFFF_FFFF;

/// General-purpose registers captured at the point `handle_panic` runs.
/// These reflect the panicking context's live register state, not a
/// separately saved trap frame — on x86-64 a `panic!()` call executes in
/// the same context that triggered it, so this is the closest thing to
/// "the registers at the point of failure" available without a dedicated
/// exception frame.
#[derive(Debug, Clone, Copy)]
pub struct CapturedRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub cr0: u64,
    pub cr2: u64,
    pub cr3: u64,
    pub cr4: u64,
}

impl CapturedRegisters {
    /// Reads the current general-purpose and control registers.
    pub fn capture() -> Self {
        let (rax, rbx, rcx, rdx, rsi, rdi, rbp, rsp): (u64, u64, u64, u64, u64, u64, u64, u64);
        unsafe {
            core::arch::asm!(
                "mov {0}, rax",
                "mov {1}, rbx",
                "mov {2}, rcx",
                "mov {3}, rdx",
                "mov {4}, rsi",
                "mov {5}, rdi",
                "mov {6}, rbp",
                "mov {7}, rsp",
                out(reg) rax,
                out(reg) rbx,
                out(reg) rcx,
                out(reg) rdx,
                out(reg) rsi,
                out(reg) rdi,
                out(reg) rbp,
                out(reg) rsp,
                options(nomem, nostack, preserves_flags),
            );
        }

        let cr2 = Cr2::read().map(|addr| addr.as_u64()).unwrap_or(0);

        Self {
            rax,
            rbx,
            rcx,
            rdx,
            rsi,
            rdi,
            rbp,
            rsp,
            cr0: Cr0::read().bits(),
            cr2,
            cr3: Cr3::read().0.start_address().as_u64(),
            cr4: Cr4::read().bits(),
        }
    }
}

/// Walks the RBP chain starting at `start_rbp`, returning up to
/// `MAX_STACK_FRAMES` return addresses. Stops early at a null, misaligned,
/// or out-of-range frame pointer rather than trusting a possibly-corrupt
/// chain.
///
/// # Safety
///
/// Each frame pointer is range-checked before it is dereferenced, but the
/// check is a sanity bound, not a guarantee the memory is mapped — this is
/// only ever called from the panic handler, where a further fault just
/// means a nested panic, which the double-panic guard already handles.
pub unsafe fn stack_trace(start_rbp: u64) -> heapless_trace::TraceBuffer {
    let mut frames = heapless_trace::TraceBuffer::new();
    let mut rbp = start_rbp;

    for _ in 0..MAX_STACK_FRAMES {
        if rbp == 0
            || rbp % 8 != 0
            || rbp < MIN_SANE_FRAME_POINTER
            || rbp > MAX_SANE_FRAME_POINTER
        {
            break;
        }

        let return_addr = unsafe { core::ptr::read((rbp + 8) as *const u64) };
        let next_rbp = unsafe { core::ptr::read(rbp as *const u64) };

        if return_addr == 0 {
            break;
        }
        frames.push(return_addr);

        if next_rbp <= rbp {
            // A sane chain only ever grows toward higher addresses walking
            // back up toward main/boot; anything else means corruption.
            break;
        }
        rbp = next_rbp;
    }

    frames
}

/// A fixed-capacity buffer for the trace, avoiding any heap allocation
/// while the allocator's own health is in question.
pub mod heapless_trace {
    use super::MAX_STACK_FRAMES;

    pub struct TraceBuffer {
        frames: [u64; MAX_STACK_FRAMES],
        len: usize,
    }

    impl TraceBuffer {
        pub const fn new() -> Self {
            Self {
                frames: [0; MAX_STACK_FRAMES],
                len: 0,
            }
        }

        pub fn push(&mut self, addr: u64) {
            if self.len < self.frames.len() {
                self.frames[self.len] = addr;
                self.len += 1;
            }
        }

        pub fn iter(&self) -> impl Iterator<Item = &u64> {
            self.frames[..self.len].iter()
        }
    }
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;

    #[test]
    fn stack_trace_rejects_null_frame_pointer() {
        let trace = unsafe { stack_trace(0) };
        assert_eq!(trace.iter().count(), 0);
    }

    #[test]
    fn stack_trace_rejects_low_frame_pointer() {
        let trace = unsafe { stack_trace(0x1000) };
        assert_eq!(trace.iter().count(), 0);
    }

    #[test]
    fn stack_trace_rejects_non_canonical_frame_pointer() {
        let trace = unsafe { stack_trace(0xFFFF_8000_0000_0000) };
        assert_eq!(trace.iter().count(), 0);
    }
}
