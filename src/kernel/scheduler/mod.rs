//! Process Scheduler

use crate::kernel::process::{ProcessId, PROCESS_TABLE};
use spin::Mutex;
use alloc::vec::Vec;
use lazy_static::lazy_static;

/// Simple round-robin scheduler
pub struct RoundRobinScheduler {
    current_pid: Option<ProcessId>,
}

impl RoundRobinScheduler {
    pub const fn new() -> Self {
        Self { current_pid: None }
    }
    
    /// Select next process to run
    pub fn schedule(&mut self) -> Option<ProcessId> {
        let table = PROCESS_TABLE.lock();
        
        // Get all ready processes
        let ready: Vec<_> = table
            .ready_processes()
            .map(|p| p.pid())
            .collect();
        
        if ready.is_empty() {
            return None;
        }
        
        // Round-robin: pick next after current
        let next_idx = if let Some(current) = self.current_pid {
            ready
                .iter()
                .position(|&pid| pid == current)
                .map(|idx| (idx + 1) % ready.len())
                .unwrap_or(0)
        } else {
            0
        };
        
        let next_pid = ready[next_idx];
        self.current_pid = Some(next_pid);
        
        Some(next_pid)
    }
}

lazy_static! {
    pub static ref SCHEDULER: Mutex<RoundRobinScheduler> =
        Mutex::new(RoundRobinScheduler::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process::{Process, ProcessState};
    use x86_64::structures::paging::PhysFrame;
    use x86_64::{PhysAddr, VirtAddr};

    fn dummy_process(pid: u64) -> Process {
        let frame = PhysFrame::containing_address(PhysAddr::new(0x9000_0000 + pid * 0x1000));
        Process::new(
            ProcessId::new(pid),
            frame,
            VirtAddr::new(0),
            VirtAddr::new(0x7FFF_F000),
            VirtAddr::new(0x40_0000),
        )
    }

    /// SPEC_FULL.md §8 scenario S3: three READY processes are dispatched
    /// in round-robin order, wrapping back to the first; a process that
    /// becomes BLOCKED is skipped on subsequent rounds without disturbing
    /// the relative order of the rest.
    #[test]
    fn round_robin_dispatches_in_order_and_skips_blocked() {
        // High, test-reserved PIDs so this doesn't collide with any other
        // test that happens to touch the global process table.
        let p1 = ProcessId::new(9001);
        let p2 = ProcessId::new(9002);
        let p3 = ProcessId::new(9003);

        {
            let mut table = PROCESS_TABLE.lock();
            table.add_process(dummy_process(9001));
            table.add_process(dummy_process(9002));
            table.add_process(dummy_process(9003));
        }

        let mut scheduler = RoundRobinScheduler::new();

        assert_eq!(scheduler.schedule(), Some(p1));
        assert_eq!(scheduler.schedule(), Some(p2));
        assert_eq!(scheduler.schedule(), Some(p3));
        assert_eq!(scheduler.schedule(), Some(p1));

        // P2 blocks: the ring now skips it indefinitely.
        PROCESS_TABLE.lock().get_process_mut(p2).unwrap().set_state(ProcessState::Blocked);

        assert_eq!(scheduler.schedule(), Some(p3));
        assert_eq!(scheduler.schedule(), Some(p1));
        assert_eq!(scheduler.schedule(), Some(p3));

        // Clean up so later tests see an empty table.
        let mut table = PROCESS_TABLE.lock();
        table.remove_process(p1);
        table.remove_process(p2);
        table.remove_process(p3);
    }
}
