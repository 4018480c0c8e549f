//! Process management API

use crate::syscall;

/// Exit the current process with the given exit code
pub fn exit(code: i32) -> ! {
    syscall::exit(code)
}

/// Get the current process ID
pub fn getpid() -> i64 {
    syscall::getpid()
}

/// Fork the current process
///
/// Returns `Ok(0)` in the child process, `Ok(child_pid)` in the parent, or
/// `Err(code)` if the kernel could not create the child (e.g. process table
/// full).
pub fn fork() -> Result<i64, i64> {
    let ret = syscall::fork();
    if ret < 0 {
        Err(ret)
    } else {
        Ok(ret)
    }
}

/// Execute a program
pub fn exec(path: &str) -> i64 {
    syscall::exec(path)
}

/// Wait for a child process to terminate
///
/// Returns the PID of the terminated child on success, or the kernel's
/// negative error code on failure (e.g. no matching child).
pub fn wait(pid: i64, status: Option<&mut i32>) -> Result<i64, i64> {
    let ret = syscall::wait(pid, status);
    if ret < 0 {
        Err(ret)
    } else {
        Ok(ret)
    }
}

/// Spawn a new process (fork + exec pattern)
pub fn spawn(path: &str) -> Result<i64, i64> {
    match fork()? {
        0 => {
            // Child process
            exec(path);
            // If exec returns, it failed
            exit(1);
        }
        pid => Ok(pid),
    }
}
