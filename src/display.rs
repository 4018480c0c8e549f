// src/display.rs

//! Display and output formatting facade.

pub mod color;
mod backend;
mod boot;
mod output;
pub use output::{
    broadcast, broadcast_args, broadcast_args_with, broadcast_with, hardware_output, HardwareOutput, Output,
};
mod panic;

#[cfg(test)]
mod tests;

pub use color::{ColorCode, VgaColor};
pub use backend::{
    default_display_backend, DefaultDisplayBackend, DisplayError, DisplayHardware, StubDisplay,
    VgaDisplay,
};
pub use boot::{
    display_boot_environment, display_boot_environment_with, display_boot_information,
    display_boot_information_with, display_feature_list, display_feature_list_with,
    display_usage_note, display_usage_note_with,
};
pub use panic::{display_panic_info_serial, display_panic_info_vga};

// `print!`/`println!` for this crate live in lib.rs, routed through
// `kernel::driver::{write_console, write_debug}`; this module only supplies
// the boot-banner and panic-display helpers re-exported above.

pub fn clear_screen() {
    #[cfg(target_arch = "x86_64")]
    crate::vga_buffer::clear().ok();
}

pub fn get_writer() -> impl Output {
    output::hardware_output()
}
