// src/vga_buffer/mod.rs

//! VGA text mode driver with interrupt-safe Mutex protection
//!
//! This module provides safe VGA text buffer access with the following features:
//! - 16-color support (VGA standard palette)
//! - Auto-scrolling when screen is full
//! - Interrupt-safe locking (prevents deadlock in interrupt handlers)
//! - fmt::Write trait implementation for print!/println! macros
//! - Boundary checking and buffer validation
//!
//! # Locking Order
//!
//! CRITICAL: to prevent deadlocks, always acquire the serial lock before
//! the VGA lock if both are needed (see `sync::lock_manager::LockId`).

mod color;
mod constants;
mod writer;

use crate::diagnostics::DIAGNOSTICS;
use crate::sync::interrupt::{InterruptController, X64InterruptController};
use crate::sync::lock_manager::{acquire_lock, LockId};
pub use color::{ColorCode, VgaColor};
pub use constants::{CELL_COUNT, VGA_HEIGHT, VGA_WIDTH};
use core::sync::atomic::Ordering;
use spin::Mutex;
pub use writer::VgaError;
use writer::{VgaWriter, BUFFER_ACCESSIBLE};

/// Global VGA writer protected by Mutex
static VGA_WRITER: Mutex<VgaWriter> = Mutex::new(VgaWriter::new());

/// Execute a function with the VGA writer, protected from interrupts
///
/// Using `without_interrupts` ensures no interrupt handler can try to
/// acquire `VGA_WRITER` while we hold it.
pub(crate) fn with_writer<F, R>(f: F) -> Result<R, VgaError>
where
    F: FnOnce(&mut VgaWriter) -> R,
{
    X64InterruptController::without_interrupts(|| {
        let _lock_guard = acquire_lock(LockId::Vga).map_err(|_| VgaError::LockOrderViolation)?;

        let mut guard = match VGA_WRITER.try_lock() {
            Some(guard) => guard,
            None => {
                DIAGNOSTICS.record_lock_contention();
                VGA_WRITER.lock()
            }
        };

        Ok(f(&mut guard))
    })
}

/// Initialize VGA buffer and test accessibility
///
/// Should be called once during kernel initialization.
pub fn init() -> Result<(), VgaError> {
    with_writer(VgaWriter::init_accessibility)
}

/// Check if VGA buffer is accessible
#[must_use = "VGA accessibility should be checked before operations"]
pub fn is_accessible() -> bool {
    BUFFER_ACCESSIBLE.load(Ordering::Acquire)
}

/// Clear the screen
pub fn clear() -> Result<(), VgaError> {
    with_writer(VgaWriter::clear)
}

/// Set the text color
pub fn set_color(color: ColorCode) -> Result<(), VgaError> {
    with_writer(move |writer| writer.set_color(color))
}

/// Print colored text
pub fn print_colored(s: &str, color: ColorCode) -> Result<(), VgaError> {
    with_writer(move |writer| writer.write_colored(s, color))
}

/// Write formatted text, used by the `println!`/`print!` macros
pub fn write_fmt(args: core::fmt::Arguments<'_>) -> Result<(), VgaError> {
    use core::fmt::Write;
    with_writer(move |writer| {
        let _ = writer.write_fmt(args);
    })
}
