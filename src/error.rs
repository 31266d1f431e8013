// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Error taxonomy for channel endpoints.
//
// Wait timeouts are deliberately absent: a timed-out wait is the liveness
// mechanism that drives disconnection polling, never an error. Region-mutex
// faults are also absent: they are logged and recovered locally.

use std::io;

use thiserror::Error;

/// Errors surfaced by channel endpoints.
///
/// Every variant carries the channel's logical (human-readable) name so a
/// failure can be attributed without consulting the OS-level region name.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The shared region exists but was created by an incompatible peer.
    /// Fatal to the endpoint; raised at construction.
    #[error("{channel}: shared region kind/version mismatch (found {found_kind}/{found_version}, expected {expected_kind}/{expected_version})")]
    VersionMismatch {
        channel: String,
        expected_kind: u16,
        expected_version: u16,
        found_kind: u16,
        found_version: u16,
    },

    /// Opening or mapping the backing shared region failed.
    #[error("{channel}: shared region setup failed: {source}")]
    Region {
        channel: String,
        #[source]
        source: io::Error,
    },

    /// Initializing an event slot's OS primitives failed.
    #[error("{channel}: event slot initialization failed: {source}")]
    EventInit {
        channel: String,
        #[source]
        source: io::Error,
    },

    /// Posting an event failed.
    #[error("{channel}: event post failed: {source}")]
    EventPost {
        channel: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on an event failed (timeouts are not reported here).
    #[error("{channel}: event wait failed: {source}")]
    EventWait {
        channel: String,
        #[source]
        source: io::Error,
    },

    /// The wire tag index does not name an alternative of the message
    /// family. Indicates a misbehaving or corrupted peer.
    #[error("{channel}: message tag {index} out of range")]
    InvalidTag { channel: String, index: u8 },

    /// Another live process already owns the receiver role for this
    /// channel. Exactly one receiver is permitted per region.
    #[error("{channel}: receiver slot already owned by live pid {pid}")]
    ReceiverBusy { channel: String, pid: i32 },
}

pub type Result<T> = std::result::Result<T, ChannelError>;
