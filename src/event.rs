// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// In-region event slot: an owner pid, a monotonic post counter, and a
// process-shared pthread mutex/cond pair, all living inside the mapped
// channel header.
//
// Waits are edge-triggered through the counter: a waiter arms itself with
// `clear()` (a snapshot of the counter plus one) and then blocks until the
// counter reaches that value. A post made while nobody is waiting is not
// lost — the counter keeps the edge until the next wait observes it.

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use crate::platform::posix;

/// Result of a bounded event wait. A timeout is an expected outcome (it
/// drives disconnection polling), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// An event slot embedded in a shared region.
///
/// `pid == 0` means the slot is vacant (no process owns it). The owner
/// initializes the pthread objects; peers may `post` at any time — posting
/// a vacant slot is a no-op, since there can be no waiter.
#[repr(C)]
pub struct Event {
    pid: AtomicI32,
    count: AtomicU32,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    cond: UnsafeCell<libc::pthread_cond_t>,
}

// Safety: all mutation goes through atomics or the embedded process-shared
// pthread objects.
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    /// A vacant slot, for placement outside a mapped region (tests, local
    /// rendezvous). In-region slots start vacant because the region file is
    /// created zero-filled.
    pub fn zeroed() -> Self {
        unsafe { std::mem::zeroed() }
    }

    /// Claim the slot: initialize the pthread objects process-shared, reset
    /// the counter, and record the calling process as owner.
    ///
    /// # Safety
    /// The caller must hold the region's mutex (or otherwise guarantee no
    /// concurrent use of the slot). Any previous owner must be gone; a stale
    /// slot left by a dead process may be re-initialized in place.
    pub unsafe fn init(&self) -> io::Result<()> {
        posix::mutex_init(self.mutex.get())?;
        posix::cond_init(self.cond.get())?;
        self.count.store(0, Ordering::Relaxed);
        self.pid.store(posix::current_pid(), Ordering::Release);
        Ok(())
    }

    /// Vacate the slot: zero the pid first so new posts become no-ops, then
    /// return the pthread objects and the counter to their zeroed state.
    /// Destroy is skipped on purpose — a peer may still probe the slot, and
    /// the zeroed representation is the vacant state peers expect.
    ///
    /// # Safety
    /// Same contract as [`Event::init`]; additionally no thread of any
    /// process may be blocked in [`Event::wait`] on this slot.
    pub unsafe fn fini(&self) {
        self.pid.store(0, Ordering::Release);
        std::ptr::write_bytes(self.mutex.get(), 0, 1);
        std::ptr::write_bytes(self.cond.get(), 0, 1);
        self.count.store(0, Ordering::Release);
    }

    /// Owning process id; 0 when vacant.
    pub fn owner_pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    /// Vacant, or owned by a process that no longer exists.
    pub fn is_vacant(&self) -> bool {
        let pid = self.owner_pid();
        pid == 0 || !posix::process_alive(pid)
    }

    /// Arm the next wait: returns the counter value the waiter must reach.
    pub fn clear(&self) -> u32 {
        self.count.load(Ordering::Acquire).wrapping_add(1)
    }

    /// Post the event: bump the counter and wake all waiters.
    /// A vacant slot is left untouched (nobody can be waiting on it).
    pub fn post(&self) -> io::Result<()> {
        if self.owner_pid() == 0 {
            return Ok(());
        }

        let mtx = self.mutex.get();
        unsafe {
            posix::mutex_lock(mtx)?;
            self.count.fetch_add(1, Ordering::Release);
            let eno = libc::pthread_cond_broadcast(self.cond.get());
            posix::mutex_unlock(mtx)?;
            if eno != 0 {
                return Err(io::Error::from_raw_os_error(eno));
            }
        }
        Ok(())
    }

    /// Block until the counter reaches `value` or `timeout` elapses.
    pub fn wait(&self, value: u32, timeout: Duration) -> io::Result<WaitOutcome> {
        // Fast path: the edge already happened.
        if counter_reached(self.count.load(Ordering::Acquire), value) {
            return Ok(WaitOutcome::Signaled);
        }

        let deadline = posix::realtime_deadline(timeout.as_micros() as u64);
        let mtx = self.mutex.get();

        unsafe {
            posix::mutex_lock(mtx)?;
            let outcome = loop {
                if counter_reached(self.count.load(Ordering::Acquire), value) {
                    break Ok(WaitOutcome::Signaled);
                }
                let eno = libc::pthread_cond_timedwait(self.cond.get(), mtx, &deadline);
                if eno == libc::ETIMEDOUT {
                    // The edge may have landed while the timer expired.
                    break if counter_reached(self.count.load(Ordering::Acquire), value) {
                        Ok(WaitOutcome::Signaled)
                    } else {
                        Ok(WaitOutcome::TimedOut)
                    };
                }
                if eno != 0 && eno != libc::EINTR {
                    break Err(io::Error::from_raw_os_error(eno));
                }
            };
            posix::mutex_unlock(mtx)?;
            outcome
        }
    }
}

/// Counter comparison tolerant of wrap-around: `current` has reached
/// `target` when it is at most half the counter space ahead.
#[inline]
fn counter_reached(current: u32, target: u32) -> bool {
    current.wrapping_sub(target) < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_reached_plain() {
        assert!(counter_reached(1, 1));
        assert!(counter_reached(2, 1));
        assert!(!counter_reached(0, 1));
    }

    #[test]
    fn counter_reached_wraps() {
        assert!(counter_reached(0, u32::MAX));
        assert!(!counter_reached(u32::MAX, 0));
    }
}
