//! Types exchanged with the STUN processing stack and the data-path hooks
//! a socket wrapper exposes to external collaborators.

use crate::classifier;
use bytes::BytesMut;
use shared::error::Result;
use shared::TransportAddress;
use std::fmt;
use stun::message::Message;

/// One demultiplexed unit of non-parsed traffic: the payload plus the
/// addresses it traveled between. Immutable after construction.
#[derive(Debug, Clone)]
pub struct RawMessage {
    bytes: BytesMut,
    remote: TransportAddress,
    local: TransportAddress,
}

impl RawMessage {
    pub fn build(bytes: BytesMut, remote: TransportAddress, local: TransportAddress) -> Self {
        Self {
            bytes,
            remote,
            local,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn remote_address(&self) -> TransportAddress {
        self.remote
    }

    pub fn local_address(&self) -> TransportAddress {
        self.local
    }

    /// Consumes the message, yielding the payload.
    pub fn into_bytes(self) -> BytesMut {
        self.bytes
    }
}

/// A parsed STUN message together with the raw datagram it came from,
/// handed to the STUN stack and fanned out by the event dispatcher.
pub struct StunMessageEvent {
    message: Message,
    raw: RawMessage,
}

impl StunMessageEvent {
    pub fn new(message: Message, raw: RawMessage) -> Self {
        Self { message, raw }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The raw 16-bit STUN message type (method and class bits combined).
    pub fn message_type(&self) -> u16 {
        self.message.typ.value()
    }

    pub fn remote_address(&self) -> TransportAddress {
        self.raw.remote_address()
    }

    pub fn local_address(&self) -> TransportAddress {
        self.raw.local_address()
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }
}

impl fmt::Debug for StunMessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StunMessageEvent")
            .field("type", &self.message_type())
            .field("remote", &self.raw.remote_address())
            .field("local", &self.raw.local_address())
            .finish()
    }
}

/// The STUN processing stack consuming parsed inbound messages. The
/// transport core only produces events; connectivity-check scheduling and
/// response generation live behind this trait.
pub trait StunStack: Send + Sync {
    fn handle_message_event(&self, event: StunMessageEvent);
}

/// Gates insertion into a socket wrapper's raw-message queue.
pub trait DataFilter: Send + Sync {
    fn accept(&self, buf: &[u8]) -> bool;
}

/// Admits only STUN-looking payloads. Attached to harvested UDP sockets so
/// connectivity-check traffic is all the application ever polls from them.
#[derive(Debug, Default)]
pub struct StunDataFilter;

impl DataFilter for StunDataFilter {
    fn accept(&self, buf: &[u8]) -> bool {
        classifier::is_stun(buf)
    }
}

/// A relayed (TURN) transmission path. When configured on a socket wrapper,
/// everything except TURN control messages is sent through it.
pub trait RelayedConnection: Send + Sync {
    fn send(&self, bytes: &[u8], dest: TransportAddress) -> Result<()>;
}
