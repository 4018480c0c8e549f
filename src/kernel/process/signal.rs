//! POSIX-style signal delivery — SPEC_FULL.md §4.7.
//!
//! Signals are recognized by semantics, not numbers. Delivery happens
//! only from `rr_schedule_next`, right before a context change, so
//! there is no nested signal handling and no callback storm.

use x86_64::VirtAddr;

/// Signal kinds the core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Signal {
    Hup = 0,
    Int,
    Quit,
    Ill,
    Trap,
    Abrt,
    Bus,
    Fpe,
    Kill,
    Segv,
    Term,
    Chld,
    Stop,
    Cont,
}

/// Number of distinct signals tracked per process.
pub const SIGNAL_COUNT: usize = 14;

impl Signal {
    pub const ALL: [Signal; SIGNAL_COUNT] = [
        Signal::Hup,
        Signal::Int,
        Signal::Quit,
        Signal::Ill,
        Signal::Trap,
        Signal::Abrt,
        Signal::Bus,
        Signal::Fpe,
        Signal::Kill,
        Signal::Segv,
        Signal::Term,
        Signal::Chld,
        Signal::Stop,
        Signal::Cont,
    ];

    #[inline]
    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as u8 as usize
    }

    /// Maps a raw signal number (as used by `kill`/`sigaction`) back to a
    /// `Signal`, or `None` if it's out of range.
    pub fn from_index(idx: usize) -> Option<Signal> {
        Signal::ALL.into_iter().find(|s| s.index() == idx)
    }

    /// KILL can never be blocked or caught (SPEC_FULL.md §4.7).
    #[inline]
    pub const fn is_unblockable(self) -> bool {
        matches!(self, Signal::Kill)
    }

    /// Delivery priority order: KILL first, then CPU-derived faults, then
    /// other termination signals, then STOP/CONT.
    const fn priority(self) -> u8 {
        match self {
            Signal::Kill => 0,
            Signal::Segv | Signal::Fpe | Signal::Ill | Signal::Bus | Signal::Trap => 1,
            Signal::Term | Signal::Int | Signal::Quit | Signal::Abrt | Signal::Hup => 2,
            Signal::Stop | Signal::Cont => 3,
            Signal::Chld => 4,
        }
    }

    /// Exit-status encoding used by `process_exit` when a signal, rather
    /// than a voluntary `exit`, terminates the process: low byte is
    /// `0x80 | signal_index`, matching the convention a shell's `$?`
    /// decodes a "killed by signal N" status with.
    pub const fn exit_status(self) -> i32 {
        0x80 | (self.index() as i32)
    }
}

/// Per-signal disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler(VirtAddr),
}

/// Default action categories (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    IgnoredByDefault,
    Stop,
    Continue,
}

impl Signal {
    pub const fn default_action(self) -> DefaultAction {
        match self {
            Signal::Chld => DefaultAction::IgnoredByDefault,
            Signal::Stop => DefaultAction::Stop,
            Signal::Cont => DefaultAction::Continue,
            _ => DefaultAction::Terminate,
        }
    }
}

/// Per-process signal state: pending/blocked/ignored bitmasks plus one
/// disposition slot per signal, and an optional saved register snapshot
/// for `sigreturn`.
#[derive(Debug, Clone)]
pub struct SignalState {
    pending: u32,
    blocked: u32,
    dispositions: [Disposition; SIGNAL_COUNT],
    /// Saved pre-signal register snapshot, set when a user handler frame
    /// is built and consumed by `sigreturn`.
    saved_context: Option<crate::kernel::process::RegisterState>,
}

impl Default for SignalState {
    fn default() -> Self {
        Self {
            pending: 0,
            blocked: 0,
            dispositions: [Disposition::Default; SIGNAL_COUNT],
            saved_context: None,
        }
    }
}

impl SignalState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self, sig: Signal) {
        self.pending |= sig.bit();
    }

    pub fn clear_pending(&mut self, sig: Signal) {
        self.pending &= !sig.bit();
    }

    pub fn is_pending(&self, sig: Signal) -> bool {
        self.pending & sig.bit() != 0
    }

    pub fn is_blocked(&self, sig: Signal) -> bool {
        !sig.is_unblockable() && (self.blocked & sig.bit() != 0)
    }

    pub fn set_blocked_mask(&mut self, mask: u32) {
        // KILL can never be recorded as blocked.
        self.blocked = mask & !Signal::Kill.bit();
    }

    pub fn blocked_mask(&self) -> u32 {
        self.blocked
    }

    pub fn pending_mask(&self) -> u32 {
        self.pending
    }

    pub fn disposition(&self, sig: Signal) -> Disposition {
        self.dispositions[sig.index()]
    }

    pub fn set_disposition(&mut self, sig: Signal, disp: Disposition) {
        if sig.is_unblockable() {
            // KILL's disposition can never be changed from Default.
            return;
        }
        self.dispositions[sig.index()] = disp;
    }

    pub fn save_context(&mut self, regs: crate::kernel::process::RegisterState) {
        self.saved_context = Some(regs);
    }

    pub fn take_saved_context(&mut self) -> Option<crate::kernel::process::RegisterState> {
        self.saved_context.take()
    }

    /// Builds the signal state a `fork` child starts with: dispositions
    /// and the blocked mask are inherited, pending signals are not.
    #[must_use]
    pub fn fork_child(&self) -> Self {
        Self {
            pending: 0,
            blocked: self.blocked,
            dispositions: self.dispositions,
            saved_context: None,
        }
    }

    /// Picks the highest-priority pending, unblocked signal, if any.
    fn next_deliverable(&self) -> Option<Signal> {
        Signal::ALL
            .into_iter()
            .filter(|&s| self.is_pending(s) && !self.is_blocked(s))
            .min_by_key(|&s| s.priority())
    }
}

/// Outcome of delivering one signal to a process, for the scheduler to
/// act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing deliverable right now.
    NoneDeliverable,
    /// The process was terminated (ZOMBIE) as a result.
    Terminated(Signal),
    /// The process was stopped (BLOCKED, no wait queue).
    Stopped,
    /// The process was resumed (READY).
    Continued,
    /// The signal was ignored per disposition.
    Ignored(Signal),
    /// A user handler frame was built; caller must rewrite `rip`.
    HandlerInvoked(Signal, VirtAddr),
}

/// Delivers at most one signal to `pid`'s pending set, per the ordering
/// and default-action rules of SPEC_FULL.md §4.7. Called by
/// `rr_schedule_next` before any context change.
pub fn deliver_pending_signals(pid: crate::kernel::process::ProcessId) -> DeliveryOutcome {
    use crate::kernel::process::{ProcessState, PROCESS_TABLE};

    loop {
        let (sig, disposition, regs) = {
            let mut table = PROCESS_TABLE.lock();
            let Some(process) = table.get_process_mut(pid) else {
                return DeliveryOutcome::NoneDeliverable;
            };
            let Some(sig) = process.signal_state().next_deliverable() else {
                return DeliveryOutcome::NoneDeliverable;
            };
            process.signal_state_mut().clear_pending(sig);
            let disposition = process.signal_state().disposition(sig);
            (sig, disposition, *process.registers())
        };

        if sig.is_unblockable() {
            crate::kernel::process::lifecycle::terminate_process(pid, sig.exit_status());
            return DeliveryOutcome::Terminated(sig);
        }

        match disposition {
            Disposition::Ignore => return DeliveryOutcome::Ignored(sig),
            Disposition::Handler(entry) => {
                let mut table = PROCESS_TABLE.lock();
                if let Some(process) = table.get_process_mut(pid) {
                    process.signal_state_mut().save_context(regs);
                    let frame = process.registers_mut();
                    frame.rdi = sig.index() as u64;
                    frame.rip = entry.as_u64();
                }
                return DeliveryOutcome::HandlerInvoked(sig, entry);
            }
            Disposition::Default => match sig.default_action() {
                DefaultAction::Terminate => {
                    crate::kernel::process::lifecycle::terminate_process(pid, sig.exit_status());
                    return DeliveryOutcome::Terminated(sig);
                }
                DefaultAction::IgnoredByDefault => return DeliveryOutcome::Ignored(sig),
                DefaultAction::Stop => {
                    let mut table = PROCESS_TABLE.lock();
                    if let Some(process) = table.get_process_mut(pid) {
                        process.set_state(ProcessState::Blocked);
                    }
                    return DeliveryOutcome::Stopped;
                }
                DefaultAction::Continue => {
                    let mut table = PROCESS_TABLE.lock();
                    if let Some(process) = table.get_process_mut(pid) {
                        if process.state() == ProcessState::Blocked {
                            process.set_state(ProcessState::Ready);
                        }
                    }
                    return DeliveryOutcome::Continued;
                }
            },
        }
    }
}
