// src/kernel/process/mod.rs
//! Process management module
//!
//! This module provides process structure and lifecycle management
//! for user-mode processes.

use x86_64::structures::paging::{PhysFrame, PageTable, FrameAllocator, Size4KiB};
use x86_64::VirtAddr;
use alloc::vec::Vec;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use spin::Mutex;
use lazy_static::lazy_static;

use crate::config::{FD_TABLE_SIZE, MAX_COMMAND_LEN, MAX_PATH_LEN};
use crate::kernel::fs::FileDescriptor;

pub mod elf;
pub mod lifecycle;
pub mod signal;
pub mod switch;

pub use lifecycle::{create_user_process, terminate_process};
pub use signal::{Disposition, Signal, SignalState};
pub use switch::context_switch;

/// A single open-file slot. `None` means the slot is free.
pub type FdSlot = Option<Arc<Mutex<dyn FileDescriptor>>>;

/// Fixed-size file-descriptor table, one per process (SPEC_FULL.md §3/§4.3).
pub type FdTable = [FdSlot; FD_TABLE_SIZE];

/// Sentinel returned by `add_file_descriptor` when the table is full.
pub const FD_TABLE_FULL: u64 = u64::MAX;

/// Explicit execution privilege level of a process (SPEC_FULL.md §3: "mode
/// is an explicit argument; it is never inferred from address values").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Kernel,
    User,
}

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Create a new process ID
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
    
    /// Get the raw ID value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Process state
///
/// Maps directly onto the RUNNING/READY/BLOCKED/ZOMBIE state machine of
/// SPEC_FULL.md §4.3; `Terminated` here is that document's ZOMBIE: the
/// record survives, exit code set, until a parent's `wait` reaps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is currently running
    Running,
    /// Process is ready to run
    Ready,
    /// Process is blocked (waiting for I/O, a child, a signal stop, etc.)
    Blocked,
    /// Process has exited; record lives on as a zombie until reaped
    Terminated,
}

/// Saved register state for context switching
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RegisterState {
    /// General purpose registers
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    
    /// Program counter
    pub rip: u64,
    
    /// Flags register
    pub rflags: u64,
}

impl Default for RegisterState {
    fn default() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0x202, // Default: IF (interrupt flag) set
        }
    }
}

/// Process control block
pub struct Process {
    /// Process ID
    pid: ProcessId,
    
    /// Current state
    state: ProcessState,
    
    /// Page table physical frame
    /// Note: We store the physical frame instead of a reference
    /// to avoid lifetime issues
    page_table_frame: PhysFrame,
    
    /// Kernel stack (for syscall handling)
    kernel_stack: VirtAddr,
    
    /// User stack  
    user_stack: VirtAddr,
    
    /// Saved CPU state for context switching
    saved_registers: RegisterState,

    /// Saved kernel stack pointer for context switching
    /// This holds the RSP when the process is switched out
    context_rsp: u64,

    /// Parent Process ID
    parent_pid: Option<ProcessId>,

    /// Exit code (if terminated)
    exit_code: Option<i32>,

    /// Top of mmap allocation (bump allocator)
    mmap_top: VirtAddr,

    /// Current program break, for `brk` (SPEC_FULL.md §4.6 "Memory").
    /// A separate bump region from `mmap_top`, matching `brk`'s and
    /// `mmap`'s distinct address ranges on a real POSIX system.
    program_break: VirtAddr,

    /// Explicit privilege level (SPEC_FULL.md §3: never inferred from addresses)
    mode: ProcessMode,

    /// Short command name, as in `argv[0]`'s basename (SPEC_FULL.md §3)
    command: String,

    /// Current working directory, used by relative-path syscalls
    cwd: String,

    uid: u32,
    gid: u32,
    euid: u32,
    egid: u32,
    umask: u32,

    /// Open-file slots; 0/1/2 preinitialized to stdin/stdout/stderr
    fd_table: FdTable,
    /// Next fd index `add_file_descriptor` starts its free-slot search at
    next_fd: u64,

    /// Pending/blocked/ignored signals plus per-signal disposition
    signal_state: SignalState,
}

/// Builds a fresh, empty fd table. Slots 0/1/2 are left unused here —
/// stdin/stdout/stderr are handled as special-cased fd numbers directly
/// in `kernel::syscall::{sys_read, sys_write}` rather than through table
/// entries, since there is no VFS handle to back them with.
fn init_fd_table() -> FdTable {
    core::array::from_fn(|_| None)
}

impl Drop for Process {
    fn drop(&mut self) {
        use crate::kernel::mm::allocator::BOOT_INFO_ALLOCATOR;
        use crate::kernel::mm::user_paging::vmm_destroy;

        // Walk the user half and free every data frame and intermediate
        // table page it reaches, then free the root itself (SPEC_FULL.md
        // §4.2 `vmm_destroy`). The kernel half is shared and untouched.
        let mut allocator_lock = BOOT_INFO_ALLOCATOR.lock();
        if let Some(frame_allocator) = allocator_lock.as_mut() {
            vmm_destroy(self.page_table_frame, frame_allocator);
        }
        drop(allocator_lock);

        // Free the kernel stack allocated in `allocate_kernel_stack`: the
        // stored address is the top of the stack, so recover the base.
        if self.kernel_stack.as_u64() != 0 {
            let layout = Layout::from_size_align(crate::config::KERNEL_STACK_SIZE as usize, 16)
                .expect("kernel stack layout");
            let base = self.kernel_stack.as_u64() - crate::config::KERNEL_STACK_SIZE;
            unsafe { dealloc(base as *mut u8, layout) };
        }

        crate::debug_println!(
            "[Process] Dropped PID={} (freed address space and kernel stack)",
            self.pid.as_u64()
        );
    }
}

impl Process {
    /// Create a new process
    ///
    /// # Arguments
    /// * `pid` - Process ID
    /// * `page_table_frame` - Physical frame containing the process's page table
    /// * `kernel_stack` - Virtual address of the kernel stack
    /// * `user_stack` - Virtual address of the user stack
    /// * `entry_point` - Virtual address where execution should start
    #[must_use]
    #[allow(clippy::field_reassign_with_default)] // Intentional: selective initialization
    pub fn new(
        pid: ProcessId,
        page_table_frame: PhysFrame,
        kernel_stack: VirtAddr,
        user_stack: VirtAddr,
        entry_point: VirtAddr,
    ) -> Self {
        let mut registers = RegisterState::default();
        registers.rip = entry_point.as_u64();
        registers.rsp = user_stack.as_u64();
        
        Self {
            pid,
            state: ProcessState::Ready,
            page_table_frame,
            kernel_stack,
            user_stack,
            saved_registers: registers,
            context_rsp: 0, // Will be set during context switch
            parent_pid: None,
            exit_code: None,
            mmap_top: VirtAddr::new(0x0000_0010_0000_0000), // Start mmap at 64GB
            program_break: VirtAddr::new(0x0000_0000_0600_0000), // Start brk at 96MB
            mode: ProcessMode::User,
            command: String::new(),
            cwd: String::from("/"),
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            umask: 0o022,
            fd_table: init_fd_table(),
            next_fd: 3, // 0/1/2 reserved for stdin/stdout/stderr
            signal_state: SignalState::new(),
        }
    }
    
    /// Get process ID
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }
    
    /// Get current state
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }
    
    /// Set process state
    pub const fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }
    
    /// Get page table frame
    #[must_use]
    pub const fn page_table_frame(&self) -> PhysFrame {
        self.page_table_frame
    }
    
    /// Get kernel stack pointer
    #[must_use]
    pub const fn kernel_stack(&self) -> VirtAddr {
        self.kernel_stack
    }
    
    /// Get user stack pointer
    #[must_use]
    pub const fn user_stack(&self) -> VirtAddr {
        self.user_stack
    }
    
    /// Get saved registers
    #[must_use]
    pub const fn registers(&self) -> &RegisterState {
        &self.saved_registers
    }
    
    /// Get mutable saved registers
    pub const fn registers_mut(&mut self) -> &mut RegisterState {
        &mut self.saved_registers
    }

    /// Get mutable reference to context RSP
    pub fn context_rsp_mut(&mut self) -> &mut u64 {
        &mut self.context_rsp
    }

    /// Get context RSP
    pub const fn context_rsp(&self) -> u64 {
        self.context_rsp
    }

    /// Update process image (for exec)
    pub fn update_image(&mut self, page_table_frame: PhysFrame, user_stack: VirtAddr, _entry_point: VirtAddr) {
        self.page_table_frame = page_table_frame;
        self.user_stack = user_stack;
        // Note: entry_point is not stored in Process, it's in registers.rip
        // But we update it here for completeness if we add it later.
        // Actually, we update registers in exec_process.
    }

    /// Get parent PID
    pub fn parent_pid(&self) -> Option<ProcessId> {
        self.parent_pid
    }

    /// Set parent PID
    pub fn set_parent_pid(&mut self, pid: ProcessId) {
        self.parent_pid = Some(pid);
    }

    /// Get exit code
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Set exit code
    pub fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    /// Get mmap top
    pub fn mmap_top(&self) -> VirtAddr {
        self.mmap_top
    }

    /// Set mmap top
    pub fn set_mmap_top(&mut self, addr: VirtAddr) {
        self.mmap_top = addr;
    }

    /// Get the current program break
    pub fn program_break(&self) -> VirtAddr {
        self.program_break
    }

    /// Set the program break
    pub fn set_program_break(&mut self, addr: VirtAddr) {
        self.program_break = addr;
    }

    /// Get explicit privilege mode
    pub const fn mode(&self) -> ProcessMode {
        self.mode
    }

    /// Set explicit privilege mode
    pub const fn set_mode(&mut self, mode: ProcessMode) {
        self.mode = mode;
    }

    /// Get command name
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Set command name, truncated to `MAX_COMMAND_LEN` bytes
    pub fn set_command(&mut self, name: &str) {
        let end = name.len().min(MAX_COMMAND_LEN);
        self.command = String::from(&name[..end]);
    }

    /// Get current working directory
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Set current working directory, truncated to `MAX_PATH_LEN` bytes
    pub fn set_cwd(&mut self, path: &str) {
        let end = path.len().min(MAX_PATH_LEN);
        self.cwd = String::from(&path[..end]);
    }

    pub const fn uid(&self) -> u32 {
        self.uid
    }
    pub const fn gid(&self) -> u32 {
        self.gid
    }
    pub const fn euid(&self) -> u32 {
        self.euid
    }
    pub const fn egid(&self) -> u32 {
        self.egid
    }
    pub const fn umask(&self) -> u32 {
        self.umask
    }
    pub const fn set_ids(&mut self, uid: u32, gid: u32, euid: u32, egid: u32) {
        self.uid = uid;
        self.gid = gid;
        self.euid = euid;
        self.egid = egid;
    }
    pub const fn set_umask(&mut self, umask: u32) {
        self.umask = umask;
    }

    /// Look up an open file-descriptor slot
    pub fn get_file_descriptor(&self, fd: u64) -> Option<Arc<Mutex<dyn FileDescriptor>>> {
        let idx = usize::try_from(fd).ok()?;
        self.fd_table.get(idx)?.clone()
    }

    /// Install `desc` into the first free slot at index ≥ 3, returning its
    /// fd number, or `FD_TABLE_FULL` if every slot is occupied.
    pub fn add_file_descriptor(&mut self, desc: Arc<Mutex<dyn FileDescriptor>>) -> u64 {
        for idx in 3..self.fd_table.len() {
            if self.fd_table[idx].is_none() {
                self.fd_table[idx] = Some(desc);
                self.next_fd = self.next_fd.max(idx as u64 + 1);
                return idx as u64;
            }
        }
        FD_TABLE_FULL
    }

    /// Close and free a file-descriptor slot. Returns `true` if it was open.
    pub fn close_file_descriptor(&mut self, fd: u64) -> bool {
        let Ok(idx) = usize::try_from(fd) else { return false };
        let Some(slot) = self.fd_table.get_mut(idx) else { return false };
        slot.take().is_some()
    }

    /// Clone the entire fd table (each slot's `Arc` is ref-counted, not
    /// deep-copied) for `fork`, plus the next-free-slot cursor.
    pub fn clone_file_descriptors(&self) -> (FdTable, u64) {
        (self.fd_table.clone(), self.next_fd)
    }

    /// Install a cloned fd table (used by `fork`'s child)
    pub fn set_file_descriptors(&mut self, fds: FdTable, next_fd: u64) {
        self.fd_table = fds;
        self.next_fd = next_fd;
    }

    /// Read-only access to signal state
    pub fn signal_state(&self) -> &SignalState {
        &self.signal_state
    }

    /// Mutable access to signal state
    pub fn signal_state_mut(&mut self) -> &mut SignalState {
        &mut self.signal_state
    }
}

/// Process table - manages all processes in the system
pub struct ProcessTable {
    processes: Vec<Process>,
    next_pid: u64,
    current_pid: Option<ProcessId>,
}

impl ProcessTable {
    /// Create a new empty process table
    #[must_use]
    #[allow(clippy::new_without_default)] // Intentional: explicit new() for clarity
    pub const fn new() -> Self {
        Self {
            processes: Vec::new(),
            next_pid: 1, // PID 0 is reserved for the kernel
            current_pid: None,
        }
    }
    
    /// Add a new process to the table
    pub fn add_process(&mut self, process: Process) -> ProcessId {
        let pid = process.pid();
        self.processes.push(process);
        pid
    }
    
    /// Allocate a new process ID
    pub const fn allocate_pid(&mut self) -> ProcessId {
        let pid = ProcessId::new(self.next_pid);
        self.next_pid += 1;
        pid
    }
    
    /// Get a process by ID
    #[must_use]
    pub fn get_process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid() == pid)
    }
    
    /// Get a mutable process by ID
    pub fn get_process_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid() == pid)
    }
    
    /// Get the currently running process
    #[must_use]
    pub fn current_process(&self) -> Option<&Process> {
        self.current_pid.and_then(|pid| self.get_process(pid))
    }
    
    /// Get the currently running process (mutable)
    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        self.current_pid.and_then(|pid| self.get_process_mut(pid))
    }
    
    /// Set the current process
    pub const fn set_current(&mut self, pid: ProcessId) {
        self.current_pid = Some(pid);
    }
    
    /// Get all ready processes
    pub fn ready_processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter().filter(|p| p.state() == ProcessState::Ready)
    }

    /// Find a terminated child of the given parent. If `target` is
    /// `Some`, only that specific child qualifies (`wait4(pid, ...)`);
    /// `None` matches any child (`wait4(-1, ...)`).
    /// Returns (child_pid, exit_code) if found
    pub fn find_terminated_child(&self, parent_pid: ProcessId, target: Option<ProcessId>) -> Option<(ProcessId, i32)> {
        self.processes.iter()
            .find(|p| {
                p.parent_pid() == Some(parent_pid)
                    && p.state() == ProcessState::Terminated
                    && target.is_none_or(|t| p.pid() == t)
            })
            .map(|p| (p.pid(), p.exit_code().unwrap_or(0)))
    }

    /// Check if a process has the given child (or any child, if `target`
    /// is `None`), regardless of state.
    pub fn has_children(&self, parent_pid: ProcessId, target: Option<ProcessId>) -> bool {
        self.processes
            .iter()
            .any(|p| p.parent_pid() == Some(parent_pid) && target.is_none_or(|t| p.pid() == t))
    }

    /// Reparent every live (non-terminated) child of `old_parent` to
    /// `new_parent`. Returns the PIDs that were reparented, so the caller
    /// can decide whether to notify `new_parent`.
    pub fn reparent_children(&mut self, old_parent: ProcessId, new_parent: ProcessId) -> Vec<ProcessId> {
        let mut reparented = Vec::new();
        for p in &mut self.processes {
            if p.parent_pid() == Some(old_parent) {
                p.set_parent_pid(new_parent);
                reparented.push(p.pid());
            }
        }
        reparented
    }

    /// Reap every zombie (terminated, unreaped) child of `parent_pid`.
    pub fn reap_zombie_children(&mut self, parent_pid: ProcessId) {
        self.processes
            .retain(|p| !(p.parent_pid() == Some(parent_pid) && p.state() == ProcessState::Terminated));
    }
    
    /// Remove a process from the table (reap)
    pub fn remove_process(&mut self, pid: ProcessId) {
        if let Some(idx) = self.processes.iter().position(|p| p.pid() == pid) {
            self.processes.remove(idx);
        }
    }
}

lazy_static! {
    /// Global process table
    pub static ref PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
}

use crate::config::{KERNEL_STACK_SIZE, USER_STACK_SIZE};

/// Allocate a user stack for a process
///
/// Allocates `USER_STACK_SIZE` bytes and returns the top address
fn allocate_user_stack() -> VirtAddr {
    let layout = Layout::from_size_align(USER_STACK_SIZE as usize, 16)
        .expect("Invalid stack layout");
    let ptr = unsafe { alloc_zeroed(layout) };
    assert!(!ptr.is_null(), "Failed to allocate user stack");
    // Return the top of the stack (grows downward)
    VirtAddr::new(ptr as u64 + USER_STACK_SIZE)
}

/// Allocate a kernel stack for syscall handling
///
/// Allocates `KERNEL_STACK_SIZE` bytes and returns the top address
fn allocate_kernel_stack() -> VirtAddr {
    let layout = Layout::from_size_align(KERNEL_STACK_SIZE as usize, 16)
        .expect("Invalid stack layout");
    let ptr = unsafe { alloc_zeroed(layout) };
    assert!(!ptr.is_null(), "Failed to allocate kernel stack");
    // Return the top of the stack (grows downward)
    VirtAddr::new(ptr as u64 + KERNEL_STACK_SIZE)
}

/// Create a new user page table
///
/// Creates a minimal page table that maps:
/// - Kernel space (upper half: entries 256-511) copied from current page table
///   This allows kernel code/data to be accessible during syscalls
/// - User space (lower half: entries 0-255) initially empty
///   User code/data will be mapped as needed
///
/// # Phase 2 Implementation
/// - Copies kernel mappings for syscall handling
/// - Isolates user address space per process
/// - Enables per-process memory protection
///
/// # Arguments
/// * `frame_allocator` - Frame allocator for new page tables
/// * `physical_memory_offset` - Offset to access physical memory
///
/// # Returns
/// Physical frame containing the new page table, or error message
fn create_user_page_table<A>(
    frame_allocator: &mut A,
    physical_memory_offset: VirtAddr,
) -> Result<PhysFrame, &'static str>
where
    A: FrameAllocator<Size4KiB>,
{
    // Allocate a frame for the new page table
    let frame = frame_allocator
        .allocate_frame()
        .ok_or("Failed to allocate frame for page table")?;
    
    // Get a mutable reference to the page table
    let page_table_ptr = (physical_memory_offset + frame.start_address().as_u64()).as_mut_ptr::<PageTable>();
    let page_table = unsafe { &mut *page_table_ptr };
    
    // Zero out the page table (clear all entries)
    page_table.zero();
    
    // Copy kernel mappings (upper half: 0xFFFF_8000_0000_0000 and above)
    // This is required for:
    // - Syscall handler code execution
    // - Kernel stack access during syscalls
    // - Interrupt handlers (if interrupts occur in user mode)
    let kernel_pt_frame = x86_64::registers::control::Cr3::read().0;
    let kernel_pt_ptr = (physical_memory_offset + kernel_pt_frame.start_address().as_u64()).as_ptr::<PageTable>();
    let kernel_pt = unsafe { &*kernel_pt_ptr };
    
    // Copy entries 256-511 (kernel space in canonical addressing)
    // Entry 256 maps: 0xFFFF_8000_0000_0000 - 0xFFFF_807F_FFFF_FFFF (512 GiB)
    // Entry 511 maps: 0xFFFF_FF80_0000_0000 - 0xFFFF_FFFF_FFFF_FFFF (512 GiB)
    for i in 256..512 {
        page_table[i] = kernel_pt[i].clone();
    }
    
    Ok(frame)
}

/// Create a new process
///
/// This is a high-level function that allocates a PID and adds the process
/// to the global process table. It also allocates necessary resources like
/// page tables and stacks.
///
/// # Arguments
/// * `entry_point` - Virtual address where execution should start
/// * `frame_allocator` - Frame allocator for page table creation
/// * `physical_memory_offset` - Physical memory offset for page table access
///
/// # Returns
/// Process ID on success, or error message on failure
/// 
/// # Errors
/// Returns error if:
/// - Frame allocation fails for page table
/// - Stack allocation fails (panics, not error)
pub fn create_process<A>(
    entry_point: VirtAddr,
    frame_allocator: &mut A,
    physical_memory_offset: VirtAddr,
) -> Result<ProcessId, &'static str>
where
    A: FrameAllocator<Size4KiB>,
{
    let mut table = PROCESS_TABLE.lock();
    let pid = table.allocate_pid();
    
    // Create user page table
    let page_table_frame = create_user_page_table(frame_allocator, physical_memory_offset)?;
    
    // Allocate stacks
    let kernel_stack = allocate_kernel_stack();
    let user_stack = allocate_user_stack();
    
    // Create process
    let process = Process::new(pid, page_table_frame, kernel_stack, user_stack, entry_point);
    table.add_process(process);
    
    Ok(pid)
}

/// Create a new process and return the Process object
///
/// Similar to `create_process()`, but returns the process directly
/// instead of just the PID. Useful for immediate execution.
///
/// # Arguments
/// * `entry_point` - Virtual address where execution should start
/// * `frame_allocator` - Frame allocator for page table creation  
/// * `physical_memory_offset` - Physical memory offset for page table access
///
/// # Returns
/// Process object on success, or error message on failure
/// 
/// # Errors
/// Returns error if:
/// - Frame allocation fails for page table
/// - Stack allocation fails (panics, not error)
pub fn create_process_with_context<A>(
    entry_point: VirtAddr,
    frame_allocator: &mut A,
    physical_memory_offset: VirtAddr,
) -> Result<Process, &'static str>
where
    A: FrameAllocator<Size4KiB>,
{
    let mut table = PROCESS_TABLE.lock();
    let pid = table.allocate_pid();
    
    // Create user page table
    let page_table_frame = create_user_page_table(frame_allocator, physical_memory_offset)?;
    
    // Allocate stacks (16-byte aligned as verified by syscall.rs)
    let kernel_stack = allocate_kernel_stack();
    let user_stack = allocate_user_stack();
    
    // Verify stack alignment (critical for syscall mechanism)
    debug_assert!(
        kernel_stack.as_u64().is_multiple_of(16),
        "Kernel stack not 16-byte aligned: 0x{:x}",
        kernel_stack.as_u64()
    );
    debug_assert!(
        user_stack.as_u64().is_multiple_of(16),
        "User stack not 16-byte aligned: 0x{:x}",
        user_stack.as_u64()
    );
    
    // Create process
    Ok(Process::new(pid, page_table_frame, kernel_stack, user_stack, entry_point))
}

/// Switch to a process (context switch)
///
/// Updates the kernel stack pointer for syscall handling and switches
/// the page table to the process's address space.
///
/// This should be called before jumping to user mode or when switching
/// between processes.
///
/// # Arguments
/// * `process` - Process to switch to
///
/// # Safety
/// Caller must ensure:
/// - Process has valid page table
/// - Process stacks are properly initialized
/// - No outstanding references to old address space
pub unsafe fn switch_to_process(process: &Process) {
    use x86_64::registers::control::Cr3;
    
    // Update kernel stack for syscall handling
    // This is critical: syscall_entry() will load from CURRENT_KERNEL_STACK
    crate::arch::x86_64::syscall::set_kernel_stack(process.kernel_stack());
    
    // Switch page table (if different from current)
    let (current_frame, flags) = Cr3::read();
    if current_frame != process.page_table_frame() {
        unsafe {
            Cr3::write(process.page_table_frame(), flags);
        }
    }
}

/// Jump to user mode with the given process context
///
/// This function:
/// 1. Switches to the process's address space
/// 2. Sets up the kernel stack for syscall handling  
/// 3. Transitions to Ring 3 and begins execution
///
/// # Safety
/// This function is unsafe because:
/// - It directly manipulates CPU registers and privilege levels
/// - The process must have valid executable code at entry point
/// - The process must have valid stacks
/// - Interrupts must be properly configured
///
/// # Arguments
/// * `process` - Process to execute
#[allow(dead_code)]
pub unsafe fn jump_to_usermode_with_process(process: &Process) -> ! {
    // Switch to process context (page table + kernel stack)
    unsafe {
        switch_to_process(process);
    }
    
    // Mark as current process
    PROCESS_TABLE.lock().set_current(process.pid());
    
    // Jump to user mode
    let entry = VirtAddr::new(process.registers().rip);
    unsafe {
        jump_to_usermode(entry, process.user_stack())
    }
}



/// Schedule the next process and switch to it
///
/// This function:
/// 1. Picks the next process using the scheduler
/// 2. Releases the process table lock (critical for avoiding deadlocks)
/// 3. Performs the context switch
///
/// If no other process is ready, it returns immediately (if current is ready)
/// or loops/halts (if current is blocked).
pub fn schedule_next() {
    use crate::kernel::scheduler::SCHEDULER;
    use crate::kernel::process::signal::{deliver_pending_signals, DeliveryOutcome};

    loop {
        // 1. Pick next process and prepare for switch
        let switch_info = {
            let mut table = PROCESS_TABLE.lock();
            let mut scheduler = SCHEDULER.lock();

            let current_pid = table.current_pid;

            // If current process is running, it should be in Ready state (unless it blocked itself)
            // The scheduler will pick it up if it's Ready.

            if let Some(next_pid) = scheduler.schedule() {
                if Some(next_pid) == current_pid {
                    // Same process, no switch needed
                    None
                } else {
                    // Switch needed
                    let current = table.current_process_mut().expect("Current process invalid");
                    let current_ctx_ptr = current.context_rsp_mut() as *mut u64;

                    let next = table.get_process(next_pid).expect("Next process invalid");
                    let next_ctx_val = next.context_rsp();

                    // Update current PID
                    table.set_current(next_pid);

                    Some((current_ctx_ptr, next_ctx_val, next_pid))
                }
            } else {
                // No ready processes.
                // If current is blocked, we have a problem (deadlock/idle).
                // For now, we assume there's always an idle process or we just return.
                // But if we return and we are Blocked, we will just loop in sys_wait?
                // Ideally we should enable interrupts and halt.
                None
            }
        }; // Locks released

        // Deliver pending signals to whichever process is about to become
        // current, before any context change. If that delivery terminates
        // it, the ready set just changed underneath us — reschedule.
        let dispatch_pid = switch_info
            .as_ref()
            .map(|(_, _, pid)| *pid)
            .or_else(|| PROCESS_TABLE.lock().current_pid);

        if let Some(pid) = dispatch_pid {
            if let DeliveryOutcome::Terminated(_) = deliver_pending_signals(pid) {
                continue;
            }
        }

        // 2. Perform switch if needed
        if let Some((current_ctx_ptr, next_ctx_val, _)) = switch_info {
            unsafe {
                crate::kernel::process::switch::switch_context_asm(current_ctx_ptr, next_ctx_val);
            }
        }
        return;
    }
}

/// Switch to user mode and jump to the specified entry point
///
/// This is a low-level function that performs the actual Ring 0 -> Ring 3
/// transition. For most use cases, use `jump_to_usermode_with_process()` instead.
///
/// # Safety
/// This function is unsafe because:
/// - It directly manipulates CPU registers and privilege levels
/// - The `entry_point` must point to valid executable code
/// - The `user_stack` must point to a valid, writable memory region
/// - Interrupts must be properly configured before calling
/// - Caller must ensure kernel stack is set via `switch_to_process()` or `set_kernel_stack()`
///
/// # Arguments
/// * `entry_point` - Virtual address of user code to execute
/// * `user_stack` - Virtual address of the top of user stack
#[allow(dead_code)]
pub unsafe fn jump_to_usermode(entry_point: VirtAddr, user_stack: VirtAddr) -> ! {
    use x86_64::registers::rflags::RFlags;
    
    // GDT selector values (must match your GDT setup)
    // Typically: USER_DATA_SELECTOR = 0x20 | 3, USER_CODE_SELECTOR = 0x18 | 3
    const USER_DATA_SELECTOR: u64 = 0x23; // Ring 3 data segment (0x20 | 3)
    const USER_CODE_SELECTOR: u64 = 0x1B; // Ring 3 code segment (0x18 | 3)
    
    // Prepare RFLAGS: enable interrupts (IF=1)
    let rflags = (RFlags::INTERRUPT_FLAG).bits();
    
    // Use sysretq instruction to return to user mode
    // Stack layout for iretq:
    // [SS, RSP, RFLAGS, CS, RIP]
    unsafe {
        core::arch::asm!(
            "cli",                    // Disable interrupts during transition
            "mov ds, {0:x}",          // Set data segments
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            
            // Push iretq frame
            "push {0}",               // SS (stack segment)
            "push {1}",               // RSP (user stack pointer)
            "push {2}",               // RFLAGS
            "push {3}",               // CS (code segment)
            "push {4}",               // RIP (entry point)
            
            "iretq",                  // Return to user mode
            
            in(reg) USER_DATA_SELECTOR,
            in(reg) user_stack.as_u64(),
            in(reg) rflags,
            in(reg) USER_CODE_SELECTOR,
            in(reg) entry_point.as_u64(),
            options(noreturn)
        )
    }
}

/// Get the current process ID
#[must_use]
pub fn current_pid() -> Option<ProcessId> {
    PROCESS_TABLE.lock().current_pid
}

#[cfg(test)]
mod tests {
    use super::*;
    use x86_64::PhysAddr;

    /// A `Process` that never touches a real page table or frame
    /// allocator: `page_table_frame` is a throwaway frame number, never
    /// mapped into anything and never passed to `Drop`'s `vmm_destroy`
    /// (which is a no-op here since `BOOT_INFO_ALLOCATOR` stays `None`
    /// in a host test).
    fn dummy_process(pid: u64) -> Process {
        let frame = PhysFrame::containing_address(PhysAddr::new(pid * 0x1000));
        Process::new(
            ProcessId::new(pid),
            frame,
            VirtAddr::new(0),
            VirtAddr::new(0x7FFF_F000),
            VirtAddr::new(0x40_0000),
        )
    }

    /// SPEC_FULL.md §8 property 3: PIDs handed out within a boot are
    /// strictly increasing.
    #[test]
    fn pid_allocation_is_monotonic() {
        let mut table = ProcessTable::new();
        let first = table.allocate_pid();
        let second = table.allocate_pid();
        let third = table.allocate_pid();
        assert!(first.as_u64() < second.as_u64());
        assert!(second.as_u64() < third.as_u64());
    }

    /// SPEC_FULL.md §8 property 5 / scenario S6: after a process with
    /// live children exits, every child's ppid becomes the init PID.
    #[test]
    fn orphaned_children_are_reparented_to_init() {
        let mut table = ProcessTable::new();
        let init_pid = ProcessId::new(1);
        let parent_pid = ProcessId::new(5);
        let child_pid = ProcessId::new(8);

        let mut child = dummy_process(8);
        child.set_parent_pid(parent_pid);
        table.add_process(child);

        let reparented = table.reparent_children(parent_pid, init_pid);
        assert_eq!(reparented, alloc::vec![child_pid]);
        assert_eq!(table.get_process(child_pid).unwrap().parent_pid(), Some(init_pid));
    }

    /// SPEC_FULL.md §8 property 4: a zombie with a matching `process_wait`
    /// is findable by exact pid and carries its exit code; once reaped
    /// (removed), the record is gone.
    #[test]
    fn zombie_is_found_by_exact_pid_and_then_reaped() {
        let mut table = ProcessTable::new();
        let parent_pid = ProcessId::new(1);
        let child_pid = ProcessId::new(2);

        let mut child = dummy_process(2);
        child.set_parent_pid(parent_pid);
        child.set_state(ProcessState::Terminated);
        child.set_exit_code(42);
        table.add_process(child);

        let found = table.find_terminated_child(parent_pid, Some(child_pid));
        assert_eq!(found, Some((child_pid, 42)));

        // wait4(-1, ...) style lookup (any child) finds the same zombie.
        let found_any = table.find_terminated_child(parent_pid, None);
        assert_eq!(found_any, Some((child_pid, 42)));

        table.remove_process(child_pid);
        assert!(table.get_process(child_pid).is_none());
        assert_eq!(table.find_terminated_child(parent_pid, Some(child_pid)), None);
    }

    /// A parent's own `process_exit` reaps any zombie children it never
    /// got around to waiting on, rather than leaving them orphaned.
    #[test]
    fn exiting_parent_reaps_its_own_zombie_children() {
        let mut table = ProcessTable::new();
        let parent_pid = ProcessId::new(5);

        let mut zombie_child = dummy_process(9);
        zombie_child.set_parent_pid(parent_pid);
        zombie_child.set_state(ProcessState::Terminated);
        table.add_process(zombie_child);

        let mut live_child = dummy_process(10);
        live_child.set_parent_pid(parent_pid);
        table.add_process(live_child);

        table.reap_zombie_children(parent_pid);

        assert!(table.get_process(ProcessId::new(9)).is_none());
        assert!(table.get_process(ProcessId::new(10)).is_some());
    }

    /// SPEC_FULL.md §4.3: only READY processes are offered to the
    /// scheduler; BLOCKED/ZOMBIE/RUNNING processes are skipped.
    #[test]
    fn ready_processes_filters_by_state() {
        let mut table = ProcessTable::new();

        let mut ready = dummy_process(1);
        ready.set_state(ProcessState::Ready);
        table.add_process(ready);

        let mut blocked = dummy_process(2);
        blocked.set_state(ProcessState::Blocked);
        table.add_process(blocked);

        let mut zombie = dummy_process(3);
        zombie.set_state(ProcessState::Terminated);
        table.add_process(zombie);

        let ready_pids: alloc::vec::Vec<_> = table.ready_processes().map(|p| p.pid()).collect();
        assert_eq!(ready_pids, alloc::vec![ProcessId::new(1)]);
    }
}
