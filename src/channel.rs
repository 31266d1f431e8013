// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Channel endpoints: one receiver, any number of senders, rendezvousing
// through the single message slot in the shared region.
//
// Handshake, per send: the sender takes the region mutex, writes tag,
// length, and payload, posts the receiver event, and waits on its own
// event for the acknowledgement; the receiver wakes, copies the message
// out, and posts the sender event. The mutex is released only after the
// ack, so the receiver's read window is nested inside the sender's
// critical section and needs no lock of its own.
//
// Every blocking wait is bounded by one poll period and re-checks the
// endpoint's latched disconnect flag, so disconnection is observed within
// half a second even when no peer ever posts.

use std::marker::PhantomData;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ChannelError, Result};
use crate::event::{Event, WaitOutcome};
use crate::region::{ChannelParameters, SharedRegion};
use crate::variant::MessageFamily;

/// The single poll period driving every bounded wait: event waits use it
/// as-is, the region mutex acquisition uses it divided down to
/// milliseconds. Disconnection is observed within one period.
pub const POLL_PERIOD_US: u32 = 500_000;

const POLL_PERIOD: Duration = Duration::from_micros(POLL_PERIOD_US as u64);
const MUTEX_POLL_MS: u64 = (POLL_PERIOD_US / 1000) as u64;

/// The receiving endpoint of a channel. Exactly one per physical name.
///
/// Construction claims the receiver event slot (stale slots left by dead
/// processes are reclaimed); destruction vacates it, and the region is
/// removed once no slot is owned.
pub struct MessageReceiver<M: MessageFamily> {
    region: SharedRegion,
    disconnected: AtomicBool,
    // Serializes receive against itself and against disconnect; also owns
    // the armed wait counter.
    state: Mutex<ReceiverState>,
    _family: PhantomData<fn() -> M>,
}

struct ReceiverState {
    armed: u32,
}

impl<M: MessageFamily> MessageReceiver<M> {
    /// Create the receiving endpoint, claiming the receiver role for the
    /// channel.
    pub fn create(params: ChannelParameters) -> Result<Self> {
        const { assert!(M::MAX_PAYLOAD <= u16::MAX as usize) };

        let region = SharedRegion::open(&params, M::MAX_PAYLOAD)?;
        let armed;
        {
            let _guard = region.lock();
            let hdr = region.header();
            let slot = &hdr.receiver_event;

            let owner = slot.owner_pid();
            if owner != 0 {
                if !slot.is_vacant() {
                    return Err(ChannelError::ReceiverBusy {
                        channel: region.params().logical_name.clone(),
                        pid: owner,
                    });
                }
                // Orphaned slot from a dead receiver — reclaim it.
                unsafe { slot.fini() };
            }

            unsafe { slot.init() }.map_err(|source| ChannelError::EventInit {
                channel: region.params().logical_name.clone(),
                source,
            })?;
            hdr.preamble.set_alive(true);
            armed = slot.clear();
        }

        Ok(Self {
            region,
            disconnected: AtomicBool::new(false),
            state: Mutex::new(ReceiverState { armed }),
            _family: PhantomData,
        })
    }

    /// Receive the next message. Blocks until a sender delivers one or the
    /// endpoint is disconnected; `None` means disconnected.
    pub fn receive(&self) -> Result<Option<M>> {
        self.receive_with_idle(|| {})
    }

    /// Like [`receive`](Self::receive), invoking `idle` each time a poll
    /// period elapses while still connected. `idle` must not re-enter this
    /// endpoint.
    pub fn receive_with_idle(&self, mut idle: impl FnMut()) -> Result<Option<M>> {
        let mut state = self.state.lock().unwrap();

        if self.disconnected.load(Ordering::Acquire) {
            return Ok(None);
        }

        let hdr = self.region.header();

        loop {
            match self.event_wait(&hdr.receiver_event, state.armed)? {
                WaitOutcome::Signaled => break,
                WaitOutcome::TimedOut => {
                    if self.disconnected.load(Ordering::Acquire) {
                        return Ok(None);
                    }
                    idle();
                }
            }
        }

        // Arm the next cycle before acknowledging: the ack lets the sender
        // release the mutex, and the next sender's post must not be missed.
        state.armed = hdr.receiver_event.clear();

        let index = unsafe { *hdr.message_index.get() };
        let len = unsafe { *hdr.message_len.get() };
        let payload =
            unsafe { slice::from_raw_parts(self.region.payload_ptr(), M::MAX_PAYLOAD) };

        let message =
            M::decode_from(index, len, payload).ok_or_else(|| ChannelError::InvalidTag {
                channel: self.region.params().logical_name.clone(),
                index,
            })?;

        hdr.sender_event
            .post()
            .map_err(|source| ChannelError::EventPost {
                channel: self.region.params().logical_name.clone(),
                source,
            })?;

        Ok(Some(message))
    }

    /// Disconnect the endpoint. Idempotent; may be called from any thread
    /// while a `receive` is in flight — that receive observes the flag at
    /// its next poll boundary and returns `None`.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            // The state lock creates the happens-before edge with an
            // in-flight receive, and lets senders see the channel go down.
            let _state = self.state.lock().unwrap();
            self.region.header().preamble.set_alive(false);
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn parameters(&self) -> &ChannelParameters {
        self.region.params()
    }

    fn event_wait(&self, event: &Event, armed: u32) -> Result<WaitOutcome> {
        event
            .wait(armed, POLL_PERIOD)
            .map_err(|source| ChannelError::EventWait {
                channel: self.region.params().logical_name.clone(),
                source,
            })
    }
}

impl<M: MessageFamily> Drop for MessageReceiver<M> {
    fn drop(&mut self) {
        self.disconnect();
        let _guard = self.region.lock();
        let slot = &self.region.header().receiver_event;
        if slot.owner_pid() == crate::platform::posix::current_pid() {
            unsafe { slot.fini() };
        }
    }
}

/// A sending endpoint of a channel. Any number may coexist; concurrent
/// sends serialize on the region's cross-process mutex.
///
/// The sender event slot is claimed per send, inside the critical section,
/// so short-lived senders never leave OS state behind.
pub struct MessageSender<M: MessageFamily> {
    region: SharedRegion,
    disconnected: AtomicBool,
    // Serializes send against itself and against disconnect.
    call_lock: Mutex<()>,
    _family: PhantomData<fn() -> M>,
}

impl<M: MessageFamily> MessageSender<M> {
    /// Attach a sending endpoint to the channel.
    pub fn connect(params: ChannelParameters) -> Result<Self> {
        const { assert!(M::MAX_PAYLOAD <= u16::MAX as usize) };

        let region = SharedRegion::open(&params, M::MAX_PAYLOAD)?;
        Ok(Self {
            region,
            disconnected: AtomicBool::new(false),
            call_lock: Mutex::new(()),
            _family: PhantomData,
        })
    }

    /// One-shot convenience: attach, send one message, detach.
    pub fn send_to(params: ChannelParameters, message: &M) -> Result<bool> {
        Self::connect(params)?.send(message)
    }

    /// One-shot send with an idle callback.
    pub fn send_to_with_idle(
        params: ChannelParameters,
        message: &M,
        idle: impl FnMut(),
    ) -> Result<bool> {
        Self::connect(params)?.send_with_idle(message, idle)
    }

    /// Deliver one message and wait for the receiver's acknowledgement.
    /// Returns `false` when the channel was disconnected before completion.
    pub fn send(&self, message: &M) -> Result<bool> {
        self.send_with_idle(message, || {})
    }

    /// Like [`send`](Self::send), invoking `idle` each time a poll period
    /// elapses while still connected. `idle` must not re-enter this
    /// endpoint.
    pub fn send_with_idle(&self, message: &M, mut idle: impl FnMut()) -> Result<bool> {
        let _call = self.call_lock.lock().unwrap();

        if self.disconnected.load(Ordering::Acquire) {
            return Ok(false);
        }

        let hdr = self.region.header();

        // Serialize against other senders. The only cross-sender ordering
        // the channel provides is whoever wins this mutex first.
        let _region_guard = loop {
            match self.region.lock_timed(MUTEX_POLL_MS) {
                Some(guard) => break guard,
                None => {
                    if self.receiver_gone(hdr) {
                        self.disconnected.store(true, Ordering::Release);
                    }
                    if self.disconnected.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    idle();
                }
            }
        };

        let payload =
            unsafe { slice::from_raw_parts_mut(self.region.payload_ptr(), M::MAX_PAYLOAD) };
        let (index, len) = message.encode_into(payload);
        unsafe {
            *hdr.message_index.get() = index;
            *hdr.message_len.get() = len;
        }

        // Claim the sender slot for the duration of this handshake; the
        // guard vacates it on every exit path.
        unsafe { hdr.sender_event.init() }.map_err(|source| ChannelError::EventInit {
            channel: self.region.params().logical_name.clone(),
            source,
        })?;
        let _slot_guard = SenderSlotGuard {
            event: &hdr.sender_event,
        };

        let armed = hdr.sender_event.clear();

        hdr.receiver_event
            .post()
            .map_err(|source| ChannelError::EventPost {
                channel: self.region.params().logical_name.clone(),
                source,
            })?;

        loop {
            let outcome = hdr
                .sender_event
                .wait(armed, POLL_PERIOD)
                .map_err(|source| ChannelError::EventWait {
                    channel: self.region.params().logical_name.clone(),
                    source,
                })?;
            match outcome {
                WaitOutcome::Signaled => return Ok(true),
                WaitOutcome::TimedOut => {
                    if self.receiver_gone(hdr) {
                        self.disconnected.store(true, Ordering::Release);
                    }
                    if self.disconnected.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    idle();
                }
            }
        }
    }

    /// Disconnect the endpoint. Idempotent; an in-flight `send` observes
    /// the flag at its next poll boundary and returns `false`.
    pub fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            let _call = self.call_lock.lock().unwrap();
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub fn parameters(&self) -> &ChannelParameters {
        self.region.params()
    }

    /// The receiver either disconnected (latch cleared) or its process
    /// died while still owning the slot. Checked only at poll boundaries.
    fn receiver_gone(&self, hdr: &crate::region::ChannelHeader) -> bool {
        if !hdr.preamble.alive() {
            return true;
        }
        let pid = hdr.receiver_event.owner_pid();
        pid != 0 && hdr.receiver_event.is_vacant()
    }
}

impl<M: MessageFamily> Drop for MessageSender<M> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Vacates the per-send sender event slot on scope exit — success,
/// disconnection, and error paths alike.
struct SenderSlotGuard<'a> {
    event: &'a Event,
}

impl Drop for SenderSlotGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.event.fini() };
    }
}
