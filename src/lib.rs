// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Typed single-slot message channels over POSIX shared memory.
//
// A channel is a named shared region carrying one message at a time
// between exactly one receiver and any number of senders, drawn from a
// compile-time closed family of POD record types. The rendezvous is driven
// by event slots embedded in the region; concurrent senders serialize on
// an in-region cross-process mutex.

mod backoff;
mod platform;

pub mod shm_name;

mod error;
pub use error::{ChannelError, Result};

mod event;
pub use event::{Event, WaitOutcome};

mod region;
pub use region::ChannelParameters;

pub mod variant;
pub use variant::{MessageFamily, Pod, VariantMessage};

mod channel;
pub use channel::{MessageReceiver, MessageSender, POLL_PERIOD_US};

pub mod chat;
pub use chat::{ChatClient, ChatServer, PeerAddress, CHAT_CLIENT_KIND};
