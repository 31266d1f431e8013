// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// The shared channel region: a named mapping holding the header (preamble,
// two event slots, message length/tag) followed by the payload buffer.
//
// Layout contract: the header is #[repr(C)] with natural alignment only,
// so every peer that maps the region computes identical field offsets. The
// payload buffer starts at the offset of the zero-sized trailing marker —
// three bytes past `message_len` — not at `size_of::<ChannelHeader>()`,
// which would include tail padding.

use std::cell::UnsafeCell;
use std::io;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::backoff;
use crate::error::{ChannelError, Result};
use crate::event::Event;
use crate::platform::posix::{self, RawMapping};

/// Identity of a channel, immutable for the lifetime of an endpoint.
///
/// `kind` and `version` are validated against the region on attach so that
/// incompatible peers fail fast instead of misreading the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelParameters {
    /// OS-visible name of the backing shared region.
    pub physical_name: String,
    /// Human name used in diagnostics and error messages.
    pub logical_name: String,
    /// Channel kind discriminator.
    pub kind: u16,
    /// Channel protocol version.
    pub version: u16,
}

const REGION_READY: u32 = 1;

/// How long an attaching endpoint waits for the creator to publish the
/// initialized header before giving up.
const INIT_WAIT_STEPS: u32 = 5_000;

/// Fixed front of the region: identity, init publication, receiver
/// presence latch, and the cross-process mutex that serializes senders.
#[repr(C)]
pub(crate) struct RegionPreamble {
    kind: u16,
    version: u16,
    init_state: AtomicU32,
    alive: AtomicU8,
    _reserved: [u8; 7],
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

impl RegionPreamble {
    /// Receiver presence latch: set by the receiver at construction,
    /// cleared on its disconnect. Senders poll it at timeout boundaries.
    pub(crate) fn alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) != 0
    }

    pub(crate) fn set_alive(&self, value: bool) {
        self.alive.store(value as u8, Ordering::Release);
    }
}

/// The complete fixed part of the header. The variable-size payload buffer
/// follows immediately after `message_index`.
#[repr(C)]
pub(crate) struct ChannelHeader {
    pub(crate) preamble: RegionPreamble,
    pub(crate) receiver_event: Event,
    pub(crate) sender_event: Event,
    pub(crate) message_len: UnsafeCell<u16>,
    pub(crate) message_index: UnsafeCell<u8>,
    message_buffer: [u8; 0],
}

// Safety: every mutable field is an atomic, a pthread object, or written
// only under the region mutex / handshake protocol.
unsafe impl Send for ChannelHeader {}
unsafe impl Sync for ChannelHeader {}

/// Offset of the payload buffer from the start of the region.
pub(crate) const PAYLOAD_OFFSET: usize = offset_of!(ChannelHeader, message_buffer);

// Pin the layout peers rely on: events follow the preamble back to back,
// the tag byte sits right after the length field, and the payload buffer
// starts one byte later with no padding.
const _: () = {
    assert!(offset_of!(ChannelHeader, receiver_event) == size_of::<RegionPreamble>());
    assert!(
        offset_of!(ChannelHeader, sender_event)
            == offset_of!(ChannelHeader, receiver_event) + size_of::<Event>()
    );
    assert!(
        offset_of!(ChannelHeader, message_index) == offset_of!(ChannelHeader, message_len) + 2
    );
    assert!(PAYLOAD_OFFSET == offset_of!(ChannelHeader, message_len) + 3);
    assert!(size_of::<RegionPreamble>() % 8 == 0);
    assert!(size_of::<Event>() % 4 == 0);
};

/// A mapped channel region plus the parameters it was opened with.
///
/// The region object owns the mapping; endpoints borrow the header through
/// it. Dropping the region removes the OS name only when both event slots
/// are vacant, so a restarted peer gets a clean slate while live peers keep
/// the region alive.
pub(crate) struct SharedRegion {
    map: RawMapping,
    params: ChannelParameters,
}

impl SharedRegion {
    /// Open or create the region sized for `max_payload` message bytes.
    ///
    /// Exactly one process observes creation and initializes the header
    /// (identity fields and the cross-process mutex; the rest of the file
    /// is born zero-filled, which is the vacant state of every other
    /// field). Non-creators wait for that publication and then validate
    /// `kind`/`version`.
    pub(crate) fn open(params: &ChannelParameters, max_payload: usize) -> Result<Self> {
        let size = PAYLOAD_OFFSET + max_payload;
        let map = RawMapping::open_or_create(&params.physical_name, size)
            .map_err(|source| ChannelError::Region {
                channel: params.logical_name.clone(),
                source,
            })?;

        let hdr_ptr = map.as_mut_ptr() as *mut ChannelHeader;

        if map.created() {
            unsafe {
                (*hdr_ptr).preamble.kind = params.kind;
                (*hdr_ptr).preamble.version = params.version;
                if let Err(source) = posix::mutex_init((*hdr_ptr).preamble.mutex.get()) {
                    map.unlink();
                    return Err(ChannelError::Region {
                        channel: params.logical_name.clone(),
                        source,
                    });
                }
                (*hdr_ptr)
                    .preamble
                    .init_state
                    .store(REGION_READY, Ordering::Release);
            }
        } else {
            let preamble = unsafe { &(*hdr_ptr).preamble };
            let mut k = 0u32;
            let mut steps = 0u32;
            while preamble.init_state.load(Ordering::Acquire) != REGION_READY {
                steps += 1;
                if steps > INIT_WAIT_STEPS {
                    return Err(ChannelError::Region {
                        channel: params.logical_name.clone(),
                        source: io::Error::new(
                            io::ErrorKind::TimedOut,
                            "shared region was never initialized by its creator",
                        ),
                    });
                }
                backoff::step(&mut k);
            }
            if preamble.kind != params.kind || preamble.version != params.version {
                return Err(ChannelError::VersionMismatch {
                    channel: params.logical_name.clone(),
                    expected_kind: params.kind,
                    expected_version: params.version,
                    found_kind: preamble.kind,
                    found_version: preamble.version,
                });
            }
        }

        Ok(Self {
            map,
            params: params.clone(),
        })
    }

    pub(crate) fn header(&self) -> &ChannelHeader {
        unsafe { &*(self.map.as_mut_ptr() as *const ChannelHeader) }
    }

    /// Start of the payload buffer.
    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.map.as_mut_ptr().add(PAYLOAD_OFFSET) }
    }

    pub(crate) fn params(&self) -> &ChannelParameters {
        &self.params
    }

    /// Acquire the cross-process mutex. A fault is logged and recovered:
    /// the returned guard then skips the matching unlock.
    pub(crate) fn lock(&self) -> RegionGuard<'_> {
        let mtx = self.header().preamble.mutex.get();
        match unsafe { posix::mutex_lock(mtx) } {
            Ok(()) => RegionGuard {
                region: self,
                locked: true,
            },
            Err(err) => {
                self.mutex_bug(&err, "region mutex lock");
                RegionGuard {
                    region: self,
                    locked: false,
                }
            }
        }
    }

    /// Timed acquisition of the cross-process mutex. `None` on timeout;
    /// faults are logged and reported as a timeout so the caller's poll
    /// loop keeps the endpoint live.
    pub(crate) fn lock_timed(&self, timeout_ms: u64) -> Option<RegionGuard<'_>> {
        let mtx = self.header().preamble.mutex.get();
        match unsafe { posix::mutex_lock_timed(mtx, timeout_ms) } {
            Ok(true) => Some(RegionGuard {
                region: self,
                locked: true,
            }),
            Ok(false) => None,
            Err(err) => {
                self.mutex_bug(&err, "region mutex timed lock");
                None
            }
        }
    }

    fn unlock(&self) {
        let mtx = self.header().preamble.mutex.get();
        if let Err(err) = unsafe { posix::mutex_unlock(mtx) } {
            self.mutex_bug(&err, "region mutex unlock");
        }
    }

    /// Mutex faults never abort a send or receive; they are reported here
    /// and the operation continues.
    fn mutex_bug(&self, err: &io::Error, context: &str) {
        tracing::error!(
            channel = %self.params.logical_name,
            os_error = err.raw_os_error().unwrap_or(0),
            "{context} failed",
        );
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let hdr = self.header();
        if hdr.preamble.init_state.load(Ordering::Acquire) != REGION_READY {
            return;
        }
        let guard = self.lock();
        let vacant = hdr.receiver_event.is_vacant() && hdr.sender_event.is_vacant();
        drop(guard);
        if vacant {
            self.map.unlink();
        }
    }
}

/// RAII guard for the region mutex: unlocks on drop.
pub(crate) struct RegionGuard<'a> {
    region: &'a SharedRegion,
    locked: bool,
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.region.unlock();
        }
    }
}
