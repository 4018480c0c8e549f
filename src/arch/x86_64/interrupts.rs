//! Interrupt Descriptor Table (IDT)
//!
//! 割り込みハンドラを設定します。

use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::PrivilegeLevel;
// use crate::println;
use crate::arch::x86_64::gdt;
use crate::arch::Cpu;
use lazy_static::lazy_static;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.double_fault.set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        // Timer Interrupt (IRQ0 -> 32)
        idt[32].set_handler_fn(timer_interrupt_handler);
        // Keyboard Interrupt (IRQ1 -> 33)
        idt[33].set_handler_fn(keyboard_interrupt_handler);
        idt
    };
}

/// IDT を初期化
pub fn init_idt() {
    IDT.load();
}

/// `true` if the frame's code segment carries Ring 3, i.e. the fault
/// happened in user code rather than in the kernel itself.
fn faulted_in_user_mode(stack_frame: &InterruptStackFrame) -> bool {
    stack_frame.code_segment().rpl() == PrivilegeLevel::Ring3
}

/// Converts a fatal user-mode fault into a signal on the current process
/// and yields to the next ready one, per the fault-routing rules of
/// SPEC_FULL.md §4.7. A kernel-mode fault is unrecoverable.
fn route_user_fault_or_die(stack_frame: &InterruptStackFrame, sig: crate::kernel::process::signal::Signal, what: &str) -> ! {
    use crate::arch::{ArchCpu};

    if !faulted_in_user_mode(stack_frame) {
        ArchCpu::disable_interrupts();
        crate::debug_println!("[EXCEPTION] {} in kernel mode at {:#x} - halting", what, stack_frame.instruction_pointer().as_u64());
        loop {
            ArchCpu::halt();
        }
    }

    use crate::kernel::process::{ProcessState, PROCESS_TABLE};
    let pid = {
        let mut table = PROCESS_TABLE.lock();
        let Some(process) = table.current_process_mut() else {
            ArchCpu::disable_interrupts();
            loop {
                ArchCpu::halt();
            }
        };
        process.signal_state_mut().raise(sig);
        process.set_state(ProcessState::Blocked);
        process.pid()
    };
    crate::debug_println!("[EXCEPTION] {} in PID={} - delivering signal", what, pid.as_u64());

    crate::kernel::process::schedule_next();

    // `schedule_next` never returns to a process parked as Blocked by a
    // fault handler; if every process is gone, there's nothing left to run.
    ArchCpu::disable_interrupts();
    loop {
        ArchCpu::halt();
    }
}

extern "x86-interrupt" fn breakpoint_handler(_stack_frame: InterruptStackFrame) {
    use crate::arch::x86_64::port::PortWriteOnly;
    unsafe {
        let mut serial = PortWriteOnly::<u8>::new(0x3F8);
        for byte in b"[EXCEPTION] BREAKPOINT\n" {
            serial.write(*byte);
        }
    }
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    route_user_fault_or_die(&stack_frame, crate::kernel::process::signal::Signal::Fpe, "DIVIDE ERROR");
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    route_user_fault_or_die(&stack_frame, crate::kernel::process::signal::Signal::Ill, "INVALID OPCODE");
}

extern "x86-interrupt" fn general_protection_fault_handler(stack_frame: InterruptStackFrame, _error_code: u64) {
    route_user_fault_or_die(&stack_frame, crate::kernel::process::signal::Signal::Segv, "GENERAL PROTECTION FAULT");
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame, _error_code: u64) -> !
{
    use crate::arch::{Cpu, ArchCpu};
    use crate::arch::x86_64::port::PortWriteOnly;

    ArchCpu::disable_interrupts();

    // シリアル出力
    unsafe {
        let mut serial = PortWriteOnly::<u8>::new(0x3F8);
        for byte in b"[EXCEPTION] DOUBLE FAULT\n" {
            serial.write(*byte);
        }
    }
    crate::debug_println!("[EXCEPTION] DOUBLE FAULT at {:#x}", stack_frame.instruction_pointer.as_u64());

    loop {
        ArchCpu::halt();
    }
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use crate::kernel::mm::PHYS_MEM_OFFSET;
    use crate::kernel::mm::allocator::BOOT_INFO_ALLOCATOR;
    use crate::kernel::mm::page_fault::handle_user_page_fault;
    use x86_64::registers::control::Cr2;
    use x86_64::structures::paging::OffsetPageTable;

    let fault_addr = Cr2::read().expect("invalid CR2 on page fault");

    if faulted_in_user_mode(&stack_frame) {
        let phys_mem_offset = x86_64::VirtAddr::new(PHYS_MEM_OFFSET.load(core::sync::atomic::Ordering::Relaxed));
        let (l4_frame, _) = x86_64::registers::control::Cr3::read();
        let l4_table_ptr = (phys_mem_offset + l4_frame.start_address().as_u64()).as_mut_ptr();
        let mut mapper = unsafe { OffsetPageTable::new(&mut *l4_table_ptr, phys_mem_offset) };

        let mut allocator_lock = BOOT_INFO_ALLOCATOR.lock();
        if let Some(frame_allocator) = allocator_lock.as_mut() {
            if handle_user_page_fault(fault_addr, error_code, &mut mapper, frame_allocator).is_ok() {
                return;
            }
        }
    }

    route_user_fault_or_die(&stack_frame, crate::kernel::process::signal::Signal::Segv, "PAGE FAULT");
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    // Cooperative scheduling only (SPEC_FULL.md §1 non-goal: no preemptive
    // time-slicing off the timer tick) — this never calls into RR. It
    // still must acknowledge the interrupt or IRQ0's priority blocks every
    // lower-priority IRQ line on the master PIC forever.
    use crate::arch::x86_64::pic::PICS;
    unsafe {
        PICS.lock().notify_end_of_interrupt(32);
    }
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    use crate::arch::x86_64::pic::PICS;
    use crate::kernel::driver::keyboard::{KEYBOARD, SCANCODE_QUEUE};

    // キーボードからスキャンコードを読み取る
    let scancode = KEYBOARD.lock().read_scancode();

    if let Some(scancode) = scancode {
        // キューに追加（Waker もここで呼ばれる）
        SCANCODE_QUEUE.lock().add_scancode(scancode);
    }

    unsafe {
        PICS.lock().notify_end_of_interrupt(33);
    }
}
