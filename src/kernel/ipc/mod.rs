//! Kernel-owned IPC channels — SPEC_FULL.md §4.6.
//!
//! A channel is a fixed-capacity ring buffer keyed by a 32-bit id, with a
//! readers wait queue and a writers wait queue. Unlike `kernel::fs::pipe`
//! (which reports `WouldBlock` and leaves blocking to the caller), a
//! channel blocks the calling process itself: it parks it on the
//! appropriate wait queue, flips it to `BLOCKED`, and yields via
//! `schedule_next`, exactly as `sys_wait` already does for child reaping.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use lazy_static::lazy_static;

use crate::config::IPC_RING_CAPACITY;
use crate::kernel::fs::{FileDescriptor, FileError, FileResult};
use crate::kernel::process::{schedule_next, ProcessId, ProcessState, PROCESS_TABLE};

/// One channel's ring buffer plus its wait queues and open-fd refcount.
pub struct Channel {
    id: u32,
    buffer: VecDeque<u8>,
    readers_waiting: VecDeque<ProcessId>,
    writers_waiting: VecDeque<ProcessId>,
    /// Number of open `ChannelFd`s referencing this channel. The channel
    /// is torn down (and everyone still parked on it woken with
    /// `ChannelClosed`) once this reaches zero.
    refcount: usize,
    closed: bool,
}

impl Channel {
    fn new(id: u32) -> Self {
        Self {
            id,
            buffer: VecDeque::with_capacity(IPC_RING_CAPACITY),
            readers_waiting: VecDeque::new(),
            writers_waiting: VecDeque::new(),
            refcount: 0,
            closed: false,
        }
    }
}

lazy_static! {
    static ref CHANNELS: Mutex<BTreeMap<u32, Arc<Mutex<Channel>>>> = Mutex::new(BTreeMap::new());
    static ref NEXT_CHANNEL_ID: Mutex<u32> = Mutex::new(1);
}

/// `find_or_create(id)`: id 0 means "allocate the next free id ≥ 1".
/// Bumps the channel's open-fd refcount by one on every call.
pub fn find_or_create(id: u32) -> Arc<Mutex<Channel>> {
    let mut channels = CHANNELS.lock();

    let resolved_id = if id == 0 {
        let mut next = NEXT_CHANNEL_ID.lock();
        let mut candidate = *next;
        while channels.contains_key(&candidate) {
            candidate = candidate.wrapping_add(1).max(1);
        }
        *next = candidate.wrapping_add(1).max(1);
        candidate
    } else {
        id
    };

    let channel = channels
        .entry(resolved_id)
        .or_insert_with(|| Arc::new(Mutex::new(Channel::new(resolved_id))))
        .clone();
    channel.lock().refcount += 1;
    channel
}

/// Drop one open reference. When the last reference goes away, every
/// process still parked on either wait queue is woken with
/// `ChannelClosed`, and the channel is removed from the table.
pub fn release(channel: &Arc<Mutex<Channel>>) {
    let (id, should_remove, woken) = {
        let mut chan = channel.lock();
        chan.refcount = chan.refcount.saturating_sub(1);
        if chan.refcount == 0 {
            chan.closed = true;
            let mut woken: Vec<ProcessId> = Vec::new();
            woken.extend(chan.readers_waiting.drain(..));
            woken.extend(chan.writers_waiting.drain(..));
            (chan.id, true, woken)
        } else {
            (chan.id, false, Vec::new())
        }
    };

    if !woken.is_empty() {
        let mut table = PROCESS_TABLE.lock();
        for pid in woken {
            if let Some(p) = table.get_process_mut(pid) {
                if p.state() == ProcessState::Blocked {
                    p.set_state(ProcessState::Ready);
                }
            }
        }
    }

    if should_remove {
        CHANNELS.lock().remove(&id);
    }
}

/// Blocking read: drains up to `buf.len()` bytes, parking the caller on
/// the readers queue while the buffer is empty (SPEC_FULL.md §4.6). A
/// successful read always transfers at least one byte.
pub fn read_blocking(channel: &Arc<Mutex<Channel>>, buf: &mut [u8]) -> FileResult<usize> {
    loop {
        let pid = crate::kernel::process::current_pid().ok_or(FileError::Other)?;

        {
            let mut chan = channel.lock();
            if chan.closed && chan.buffer.is_empty() {
                return Err(FileError::BrokenPipe);
            }
            if !chan.buffer.is_empty() {
                let mut n = 0;
                for slot in buf.iter_mut() {
                    match chan.buffer.pop_front() {
                        Some(byte) => {
                            *slot = byte;
                            n += 1;
                        }
                        None => break,
                    }
                }
                let wake_writer = chan.writers_waiting.pop_front();
                drop(chan);
                if let Some(writer_pid) = wake_writer {
                    wake(writer_pid);
                }
                return Ok(n);
            }
            chan.readers_waiting.push_back(pid);
        }

        block_current_and_yield();
    }
}

/// Blocking write: symmetric to `read_blocking`.
pub fn write_blocking(channel: &Arc<Mutex<Channel>>, buf: &[u8]) -> FileResult<usize> {
    loop {
        let pid = crate::kernel::process::current_pid().ok_or(FileError::Other)?;

        {
            let mut chan = channel.lock();
            if chan.closed {
                return Err(FileError::BrokenPipe);
            }
            let space = IPC_RING_CAPACITY - chan.buffer.len();
            if space > 0 {
                let n = space.min(buf.len());
                chan.buffer.extend(buf[..n].iter().copied());
                let wake_reader = chan.readers_waiting.pop_front();
                drop(chan);
                if let Some(reader_pid) = wake_reader {
                    wake(reader_pid);
                }
                return Ok(n);
            }
            chan.writers_waiting.push_back(pid);
        }

        block_current_and_yield();
    }
}

fn wake(pid: ProcessId) {
    let mut table = PROCESS_TABLE.lock();
    if let Some(p) = table.get_process_mut(pid) {
        if p.state() == ProcessState::Blocked {
            p.set_state(ProcessState::Ready);
        }
    }
}

fn block_current_and_yield() {
    {
        let mut table = PROCESS_TABLE.lock();
        if let Some(p) = table.current_process_mut() {
            p.set_state(ProcessState::Blocked);
        }
    }
    schedule_next();
}

/// A process's open handle onto a channel; one end can be used for both
/// reading and writing, since channels have no separate read/write half.
pub struct ChannelFd {
    channel: Arc<Mutex<Channel>>,
}

impl ChannelFd {
    #[must_use]
    pub fn open(id: u32) -> Self {
        Self {
            channel: find_or_create(id),
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.channel.lock().id
    }
}

impl FileDescriptor for ChannelFd {
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize> {
        read_blocking(&self.channel, buf)
    }

    fn write(&mut self, buf: &[u8]) -> FileResult<usize> {
        write_blocking(&self.channel, buf)
    }

    fn close(&mut self) -> FileResult<()> {
        release(&self.channel);
        Ok(())
    }
}

impl Drop for ChannelFd {
    fn drop(&mut self) {
        release(&self.channel);
    }
}

/// Read-only half of an anonymous pipe (`sys_pipe`). Backed by the same
/// `Channel` ring buffer as its write half; writing to it is rejected
/// rather than silently accepted, unlike the bidirectional `ChannelFd`.
pub struct PipeReadEnd {
    channel: Arc<Mutex<Channel>>,
}

/// Write-only half of an anonymous pipe.
pub struct PipeWriteEnd {
    channel: Arc<Mutex<Channel>>,
}

/// Creates a fresh auto-numbered channel and returns its two directional
/// halves, each holding one open reference (refcount reaches 2, so the
/// channel outlives either end closing alone — matching POSIX pipe()).
#[must_use]
pub fn new_pipe_pair() -> (PipeReadEnd, PipeWriteEnd) {
    let read_side = find_or_create(0);
    let id = read_side.lock().id;
    let write_side = find_or_create(id);
    (
        PipeReadEnd { channel: read_side },
        PipeWriteEnd { channel: write_side },
    )
}

impl FileDescriptor for PipeReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> FileResult<usize> {
        read_blocking(&self.channel, buf)
    }

    fn write(&mut self, _buf: &[u8]) -> FileResult<usize> {
        Err(FileError::InvalidInput)
    }

    fn close(&mut self) -> FileResult<()> {
        release(&self.channel);
        Ok(())
    }
}

impl Drop for PipeReadEnd {
    fn drop(&mut self) {
        release(&self.channel);
    }
}

impl FileDescriptor for PipeWriteEnd {
    fn read(&mut self, _buf: &mut [u8]) -> FileResult<usize> {
        Err(FileError::InvalidInput)
    }

    fn write(&mut self, buf: &[u8]) -> FileResult<usize> {
        write_blocking(&self.channel, buf)
    }

    fn close(&mut self) -> FileResult<()> {
        release(&self.channel);
        Ok(())
    }
}

impl Drop for PipeWriteEnd {
    fn drop(&mut self) {
        release(&self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_create_allocates_distinct_ids_for_zero() {
        let a = find_or_create(0);
        let b = find_or_create(0);
        assert_ne!(a.lock().id, b.lock().id);
    }

    #[test]
    fn find_or_create_reuses_explicit_id() {
        let a = find_or_create(42);
        let b = find_or_create(42);
        assert_eq!(a.lock().id, b.lock().id);
        assert_eq!(Arc::strong_count(&a), 3); // a, b, and the table entry
    }
}
