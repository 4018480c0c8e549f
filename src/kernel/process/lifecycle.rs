//! Process lifecycle management

use crate::kernel::process::{elf, ProcessId, ProcessState, PROCESS_TABLE};
use crate::kernel::mm::allocator::BOOT_INFO_ALLOCATOR;
use crate::kernel::mm::PHYS_MEM_OFFSET;
use crate::kernel::process::signal::Signal;
use x86_64::VirtAddr;
use x86_64::structures::paging::OffsetPageTable;

/// Error types for process creation
#[derive(Debug)]
pub enum CreateError {
    FrameAllocationFailed,
    /// The VFS collaborator failed to produce a file image (SPEC_FULL.md §4.5 step 1).
    IoError,
    ElfError(elf::ElfError),
    PageTableCreationError(&'static str),
}

impl From<elf::ElfError> for CreateError {
    fn from(e: elf::ElfError) -> Self {
        CreateError::ElfError(e)
    }
}

/// Derives a short process name from the basename of a path (SPEC_FULL.md
/// §4.5 step 3), truncated to `config::MAX_COMMAND_LEN` by `set_command`.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Loads the ELF image at `path` into a fresh address space and hands it
/// control (SPEC_FULL.md §4.5's `kexecve`). Unlike POSIX `execve`, this
/// always yields a new process record rather than replacing the caller's
/// image in place — the caller (if any) is recorded as the new process's
/// parent, and the new PID is returned.
pub fn kexecve(path: &str, argv: &[&[u8]], envp: &[&[u8]]) -> Result<ProcessId, CreateError> {
    let image = crate::kernel::fs::vfs_read_file(path).map_err(|_| CreateError::IoError)?;

    let mut allocator_lock = BOOT_INFO_ALLOCATOR.lock();
    let frame_allocator = allocator_lock.as_mut().ok_or(CreateError::FrameAllocationFailed)?;
    let phys_mem_offset = VirtAddr::new(PHYS_MEM_OFFSET.load(core::sync::atomic::Ordering::Relaxed));

    let parent_pid = PROCESS_TABLE.lock().current_process().map(|p| p.pid());

    // spawn(dummy_entry, name, USER): a fresh record with an empty
    // user-half address space and a user stack already mapped.
    let mut process = crate::kernel::process::create_process_with_context(
        VirtAddr::new(0),
        frame_allocator,
        phys_mem_offset,
    )
    .map_err(CreateError::PageTableCreationError)?;

    let pid = process.pid();
    process.set_command(basename(path));
    if let Some(ppid) = parent_pid {
        process.set_parent_pid(ppid);
    }

    let loaded = elf::load_elf_image(image, process.page_table_frame(), frame_allocator)?;
    let stack = elf::build_initial_stack(process.page_table_frame(), loaded.stack_top, argv, envp)?;

    process.registers_mut().rip = loaded.entry_point.as_u64();
    process.registers_mut().rsp = stack.rsp;
    process.registers_mut().rdi = stack.argc;
    process.registers_mut().rsi = stack.argv;
    process.registers_mut().rdx = stack.envp;

    // Setup initial kernel stack context for switching
    crate::kernel::process::switch::setup_process_context(&mut process);

    process.set_state(ProcessState::Ready);

    PROCESS_TABLE.lock().add_process(process);

    crate::debug_println!("[Process] kexecve {:?} -> PID={}", path, pid.as_u64());

    Ok(pid)
}

/// Boots the first process: equivalent to `kexecve("/bin/init", ...)`
/// with no caller, since nothing has a smaller PID to be the parent.
pub fn create_user_process() -> Result<ProcessId, CreateError> {
    kexecve("/bin/init", &[b"init"], &[])
}

/// Terminate a process
pub fn terminate_process(pid: ProcessId, exit_code: i32) {
    let mut table = PROCESS_TABLE.lock();

    let Some(process) = table.get_process_mut(pid) else { return };

    process.set_state(ProcessState::Terminated);
    process.set_exit_code(exit_code);
    let parent_pid = process.parent_pid();

    crate::debug_println!(
        "[Process] Terminated PID={} with code={}",
        pid.as_u64(),
        exit_code
    );

    // Reparent every live child to init, and reap zombie children directly:
    // nobody will ever wait() on them now that this process is gone.
    let init_pid = ProcessId::new(crate::config::INIT_PID);
    if pid != init_pid {
        table.reparent_children(pid, init_pid);
        table.reap_zombie_children(pid);
    }

    // Wake up the parent if blocked in wait(), and queue SIGCHLD for it.
    if let Some(ppid) = parent_pid {
        if let Some(parent) = table.get_process_mut(ppid) {
            parent.signal_state_mut().raise(Signal::Chld);
            if parent.state() == ProcessState::Blocked {
                parent.set_state(ProcessState::Ready);
            }
        }
    }

    // Resource cleanup (page table, stacks) happens in `Process::drop` once
    // the parent reaps this zombie via `wait`.
}

/// Fork the current process
///
/// Creates a copy of the current process with a new PID.
///
/// # Returns
/// * `Ok(pid)` - Child PID (returned to parent)
/// * `Err(e)` - Error code
pub fn fork_process() -> Result<ProcessId, CreateError> {
    let mut allocator_lock = BOOT_INFO_ALLOCATOR.lock();
    let frame_allocator = allocator_lock.as_mut().ok_or(CreateError::FrameAllocationFailed)?;
    let phys_mem_offset = VirtAddr::new(PHYS_MEM_OFFSET.load(core::sync::atomic::Ordering::Relaxed));

    // 1. Get current process info
    let (current_pid, current_registers, (parent_fds, parent_next_fd), child_signal_state, command) = {
        let table = PROCESS_TABLE.lock();
        let process = table.current_process().ok_or(CreateError::PageTableCreationError("No current process"))?;
        (
            process.pid(),
            *process.registers(),
            process.clone_file_descriptors(),
            process.signal_state().fork_child(),
            alloc::string::String::from(process.command()),
        )
    };

    // 2. Duplicate page table. The current page table is already active, so
    // a mapper built from the live Cr3 is enough to walk it.
    let mut dummy_mapper = unsafe {
        let (l4_frame, _) = x86_64::registers::control::Cr3::read();
        let l4_table_ptr = (phys_mem_offset + l4_frame.start_address().as_u64()).as_mut_ptr();
        let l4_table = &mut *l4_table_ptr;
        OffsetPageTable::new(l4_table, phys_mem_offset)
    };

    let new_page_table_frame = unsafe {
        crate::kernel::mm::user_paging::duplicate_user_page_table(
            &mut dummy_mapper,
            frame_allocator,
            phys_mem_offset
        ).map_err(|_| CreateError::PageTableCreationError("Failed to duplicate page table"))?
    };

    // 3. Allocate new PID and a fresh kernel stack (the user stack frames
    // were already duplicated by `duplicate_user_page_table`).
    let mut table = PROCESS_TABLE.lock();
    let pid = table.allocate_pid();

    use alloc::alloc::{alloc_zeroed, Layout};
    let kernel_stack_layout =
        Layout::from_size_align(crate::config::KERNEL_STACK_SIZE as usize, 16).unwrap();
    let kernel_stack_ptr = unsafe { alloc_zeroed(kernel_stack_layout) };
    let kernel_stack = VirtAddr::new(kernel_stack_ptr as u64 + crate::config::KERNEL_STACK_SIZE);

    let mut child_process = crate::kernel::process::Process::new(
        pid,
        new_page_table_frame,
        kernel_stack,
        VirtAddr::new(crate::config::USER_STACK_TOP),
        VirtAddr::new(0), // overwritten by registers.rip below
    );

    child_process.set_parent_pid(current_pid);
    child_process.set_command(&command);

    // Copy registers
    *child_process.registers_mut() = current_registers;

    // Copy file descriptors
    child_process.set_file_descriptors(parent_fds, parent_next_fd);

    // Inherit dispositions/blocked mask, not pending signals
    *child_process.signal_state_mut() = child_signal_state;

    // Set return value for child to 0
    child_process.registers_mut().rax = 0;

    // Build the trampoline stack frame on the new kernel stack.
    crate::kernel::process::switch::setup_process_context(&mut child_process);

    table.add_process(child_process);

    crate::debug_println!("[Process] Forked PID={} -> PID={}", current_pid.as_u64(), pid.as_u64());

    Ok(pid)
}
