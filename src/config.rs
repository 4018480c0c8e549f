// src/config.rs
//! Kernel-wide tunable constants.
//!
//! Centralizes values that used to be scattered as module-local `const`s
//! across `kernel::process`, `kernel::mm::page_fault`, and `kernel::syscall`.
//! Changing a number here is a one-place edit instead of a grep-and-replace.

/// Size of a process's user stack, in bytes (SPEC_FULL.md §4.3 / scenario
/// S2: an 8 KiB stack mapped at `0x7FFFD000..0x7FFFF000`).
pub const USER_STACK_SIZE: u64 = 8 * 1024;

/// Size of a process's kernel stack, in bytes.
pub const KERNEL_STACK_SIZE: u64 = 16 * 1024;

/// Top of the user stack region (SPEC_FULL.md §4.3 / S2). Stacks grow down
/// from here, so with `USER_STACK_SIZE` this spans `0x7FFFD000..0x7FFFF000`.
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_F000;

/// Base address new program images are linked and loaded at.
pub const USER_CODE_BASE: u64 = 0x0000_0000_0040_0000;

/// Maximum size reserved for a single loaded image (code + data), used to
/// bound the page-fault handler's "is this address part of the image"
/// check when a real ELF's segment extents aren't otherwise in scope.
pub const USER_IMAGE_MAX_SIZE: u64 = 1024 * 1024;

/// Number of file-descriptor slots per process (SPEC_FULL.md §3: "at least 16").
pub const FD_TABLE_SIZE: usize = 16;

/// Maximum simultaneously live process records.
pub const MAX_PROCESSES: usize = 256;

/// Maximum path length, in bytes, before NAME-TOO-LONG (SPEC_FULL.md §7).
pub const MAX_PATH_LEN: usize = 255;

/// Maximum command-name length, in bytes.
pub const MAX_COMMAND_LEN: usize = 15;

/// Capacity of one IPC channel's ring buffer, in bytes (SPEC_FULL.md §4.6).
pub const IPC_RING_CAPACITY: usize = 4096;

/// Upper bound on a single `read`/`write` syscall's buffer length.
pub const MAX_SYSCALL_BUFFER_LEN: u64 = 1024 * 1024;

/// PID of the `init` process. Orphans are reparented to this PID.
pub const INIT_PID: u64 = 1;

/// Minimum free bytes required below the final `rsp` once argv/envp are
/// written, or `kexecve` fails with STACK-TOO-SMALL (SPEC_FULL.md §4.5 step 7).
pub const MIN_STACK_HEADROOM: u64 = 256;

/// Capacity of the bounded diagnostics ring log (SPEC_FULL.md §7 reporting).
pub const RING_LOG_CAPACITY: usize = 64;
