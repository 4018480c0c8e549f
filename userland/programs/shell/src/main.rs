#![no_std]
#![no_main]

use libuser::io::{pipe, println, read, write};
use libuser::process::{exit, fork, wait};
use core::panic::PanicInfo;

#[no_mangle]
#[link_section = ".text.entry"]
pub extern "C" fn _start() -> ! {
    println("Hello from Userland Shell!");
    println("=== Testing IPC Pipes ===\n");

    // Create a pipe
    let (read_fd, write_fd) = match pipe() {
        Ok(fds) => fds,
        Err(_) => {
            println("Failed to create pipe");
            exit(1);
        }
    };

    println("Pipe created successfully");

    // Fork
    let pid = match fork() {
        Ok(p) => p,
        Err(_) => {
            println("Fork failed!");
            exit(1);
        }
    };

    if pid == 0 {
        // Child process: write to pipe
        println("[Child] Writing to pipe...");

        let message = b"Hello from child process!";
        match write(write_fd, message) {
            Ok(_) => {
                println("[Child] Wrote bytes to pipe");
            }
            Err(_) => {
                println("[Child] Write failed");
                exit(1);
            }
        };

        println("[Child] Exiting");
        exit(0);
    } else {
        // Parent process: read from pipe
        println("[Parent] Reading from pipe...");

        let mut buffer = [0u8; 64];
        match read(read_fd, &mut buffer) {
            Ok(n) if n > 0 => {
                println("[Parent] Read bytes from pipe");

                // Print as string
                if let Ok(_s) = core::str::from_utf8(&buffer[..n]) {
                    println("[Parent] Message received from child");
                }
            }
            _ => {
                println("[Parent] Read failed");
            }
        }

        // Wait for child
        let _ = wait(pid, None);
        println("[Parent] Child terminated");
        println("\n=== Pipe Test Complete ===");
        exit(0);
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    println("Shell Panic!");
    exit(1);
}
