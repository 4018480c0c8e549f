// src/main.rs

#![no_std]
#![no_main]

use bootloader_api::{entry_point, BootInfo};
use core::panic::PanicInfo;
use tiny_os::kernel::mm::allocator::BOOT_INFO_ALLOCATOR;
use tiny_os::kernel::mm::{self, BootInfoFrameAllocator, LayoutSize, VirtAddr};

/// Heap base, chosen well clear of the direct physical memory map and any
/// identity-mapped boot regions.
const HEAP_START: usize = 0x_4444_4444_0000;

/// 1 MiB kernel heap.
const HEAP_SIZE: usize = 1024 * 1024;

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    tiny_os::init::initialize_serial();

    tiny_os::arch::x86_64::init_gdt();
    tiny_os::arch::x86_64::init_idt();

    // SAFETY: called once, before interrupts are enabled, with the PIC's
    // factory-default vector offsets remapped away from CPU exceptions.
    unsafe {
        tiny_os::arch::x86_64::pic::PICS.lock().initialize();
    }

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");
    mm::init_physical_memory_offset(phys_mem_offset);

    // SAFETY: `memory_regions` comes straight from the bootloader's own
    // memory map for this boot; nothing else has touched physical memory yet.
    let frame_allocator =
        unsafe { BootInfoFrameAllocator::init(&boot_info.memory_regions, phys_mem_offset) };
    *BOOT_INFO_ALLOCATOR.lock() = Some(frame_allocator);

    // SAFETY: `HEAP_START`/`HEAP_SIZE` describe a region that is not yet
    // mapped or used by anything else; `init_heap` maps it before handing
    // it to the allocator.
    unsafe {
        tiny_os::init_heap(
            VirtAddr::new(HEAP_START),
            LayoutSize::new(HEAP_SIZE),
        )
        .expect("heap already initialized");
    }

    tiny_os::init::initialize_vga();

    tiny_os::arch::x86_64::init_syscall();

    tiny_os::display::display_boot_information();
    tiny_os::display::display_boot_environment(boot_info);
    tiny_os::display::display_feature_list();
    tiny_os::display::display_usage_note();

    match tiny_os::kernel::process::lifecycle::create_user_process() {
        Ok(pid) => tiny_os::debug_println!("[boot] init process spawned, PID={}", pid.as_u64()),
        Err(e) => tiny_os::debug_println!("[boot] failed to spawn init process: {:?}", e),
    }

    x86_64::instructions::interrupts::enable();

    loop {
        tiny_os::kernel::process::schedule_next();
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    tiny_os::panic::handler::handle_panic(info)
}

#[cfg(test)]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    tiny_os::test_main();
    tiny_os::hlt_loop()
}
