// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Request/response conversations on top of message channels.
//
// The server owns one well-known channel and receives requests tagged with
// the sender's address. Each client owns a private reply channel named
// after its address; the server answers by sending into that channel.
// Every message is therefore a pair-shaped family: the request or response
// variant plus the client's address as the fixed companion record.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::channel::{MessageReceiver, MessageSender};
use crate::error::Result;
use crate::platform::posix;
use crate::region::ChannelParameters;
use crate::variant::{Pod, VariantMessage};

/// Region kind tag for client reply channels.
pub const CHAT_CLIENT_KIND: u16 = 0x0CA7;

/// Identifies one client endpoint: its process id plus a process-local
/// sequence number, so several clients in one process stay distinct.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerAddress {
    pub pid: u64,
    pub uid: u64,
}

unsafe impl Pod for PeerAddress {}

static NEXT_PEER_UID: AtomicU64 = AtomicU64::new(0);

impl PeerAddress {
    fn next_local() -> Self {
        Self {
            pid: posix::current_pid() as u64,
            uid: NEXT_PEER_UID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

fn reply_channel_parameters(address: &PeerAddress, version: u16) -> ChannelParameters {
    ChannelParameters {
        physical_name: format!("shmsg_chat_{}_{}", address.pid, address.uid),
        logical_name: "ChatClient".to_string(),
        kind: CHAT_CLIENT_KIND,
        version,
    }
}

/// Server side of a conversation: receives `(request, address)` pairs and
/// replies to the address that asked.
pub struct ChatServer<Req: VariantMessage, Res: VariantMessage> {
    receiver: MessageReceiver<(Req, PeerAddress)>,
    version: u16,
    _responses: std::marker::PhantomData<fn() -> Res>,
}

impl<Req: VariantMessage, Res: VariantMessage> ChatServer<Req, Res> {
    pub fn create(params: ChannelParameters) -> Result<Self> {
        let version = params.version;
        Ok(Self {
            receiver: MessageReceiver::create(params)?,
            version,
            _responses: std::marker::PhantomData,
        })
    }

    /// Next request together with the address to answer to; `None` when
    /// the server was disconnected.
    pub fn receive(&self) -> Result<Option<(Req, PeerAddress)>> {
        self.receiver.receive()
    }

    /// Like [`receive`](Self::receive), with an idle callback invoked at
    /// each poll boundary.
    pub fn receive_with_idle(&self, idle: impl FnMut()) -> Result<Option<(Req, PeerAddress)>> {
        self.receiver.receive_with_idle(idle)
    }

    /// Answer one client through its private reply channel. Returns
    /// `false` when that client is gone.
    pub fn send_to(&self, address: &PeerAddress, response: Res) -> Result<bool> {
        let sender = MessageSender::<(Res, PeerAddress)>::connect(reply_channel_parameters(
            address,
            self.version,
        ))?;
        sender.send(&(response, *address))
    }

    pub fn disconnect(&self) {
        self.receiver.disconnect();
    }

    pub fn is_disconnected(&self) -> bool {
        self.receiver.is_disconnected()
    }

    pub fn parameters(&self) -> &ChannelParameters {
        self.receiver.parameters()
    }
}

/// Client side of a conversation: sends requests to the server channel and
/// receives responses on its private reply channel.
pub struct ChatClient<Req: VariantMessage, Res: VariantMessage> {
    address: PeerAddress,
    sender: MessageSender<(Req, PeerAddress)>,
    receiver: MessageReceiver<(Res, PeerAddress)>,
}

impl<Req: VariantMessage, Res: VariantMessage> ChatClient<Req, Res> {
    pub fn connect(params: ChannelParameters) -> Result<Self> {
        let version = params.version;
        let address = PeerAddress::next_local();
        let sender = MessageSender::connect(params)?;
        let receiver = MessageReceiver::create(reply_channel_parameters(&address, version))?;
        Ok(Self {
            address,
            sender,
            receiver,
        })
    }

    /// Send one request, stamped with this client's address.
    pub fn send(&self, request: Req) -> Result<bool> {
        self.sender.send(&(request, self.address))
    }

    /// Wait for the next response; `None` when disconnected.
    pub fn receive(&self) -> Result<Option<Res>> {
        Ok(self.receiver.receive()?.map(|(response, _)| response))
    }

    /// Send a request and wait for the matching response. `None` when the
    /// conversation was disconnected before the response arrived.
    pub fn send_and_receive(&self, request: Req) -> Result<Option<Res>> {
        if !self.send(request)? {
            return Ok(None);
        }
        self.receive()
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn disconnect(&self) {
        self.sender.disconnect();
        self.receiver.disconnect();
    }

    pub fn is_disconnected(&self) -> bool {
        self.sender.is_disconnected() || self.receiver.is_disconnected()
    }

    pub fn parameters(&self) -> &ChannelParameters {
        self.sender.parameters()
    }
}
