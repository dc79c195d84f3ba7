//! Logical sessions over a bound endpoint.
//!
//! TCP sessions wrap one accepted or originated connection. UDP is
//! connectionless, so the acceptor synthesizes one session per observed
//! remote; the rest of the system treats both transports uniformly.

use crate::socket::IceSocketWrapper;
use crate::stack::StunStack;
use bytes::BytesMut;
use parking_lot::Mutex;
use shared::error::{Error, Result};
use shared::tcp_framing;
use shared::TransportAddress;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Session attribute carrying the STUN stack consuming this endpoint.
pub const STUN_STACK: &str = "stun.stack";
/// Session attribute carrying the owning socket wrapper.
pub const CONNECTION: &str = "ice.connection";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Values attachable to a session by the I/O handler glue.
#[derive(Clone)]
pub enum SessionAttribute {
    StunStack(Arc<dyn StunStack>),
    Connection(Arc<IceSocketWrapper>),
}

/// Where outbound bytes for a session go.
pub(crate) enum SessionWriter {
    /// Shared datagram socket; the remote address selects the peer.
    Udp(Arc<UdpSocket>),
    /// Write half of one TCP connection, fed RFC 4571 framed packets.
    Tcp(mpsc::Sender<BytesMut>),
}

/// One logical point-to-point session.
pub struct IceSession {
    id: u64,
    local: TransportAddress,
    remote: TransportAddress,
    attributes: Mutex<HashMap<&'static str, SessionAttribute>>,
    writer: SessionWriter,
    closed: AtomicBool,
}

impl IceSession {
    pub(crate) fn new(
        local: TransportAddress,
        remote: TransportAddress,
        writer: SessionWriter,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            local,
            remote,
            attributes: Mutex::new(HashMap::new()),
            writer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_address(&self) -> TransportAddress {
        self.local
    }

    pub fn remote_address(&self) -> TransportAddress {
        self.remote
    }

    pub fn set_attribute(&self, name: &'static str, value: SessionAttribute) {
        self.attributes.lock().insert(name, value);
    }

    pub fn attribute(&self, name: &str) -> Option<SessionAttribute> {
        self.attributes.lock().get(name).cloned()
    }

    /// The STUN stack attached by the handler glue, if any.
    pub fn stun_stack(&self) -> Option<Arc<dyn StunStack>> {
        match self.attribute(STUN_STACK) {
            Some(SessionAttribute::StunStack(stack)) => Some(stack),
            _ => None,
        }
    }

    /// The owning socket wrapper attached by the handler glue, if any.
    pub fn connection(&self) -> Option<Arc<IceSocketWrapper>> {
        match self.attribute(CONNECTION) {
            Some(SessionAttribute::Connection(wrapper)) => Some(wrapper),
            _ => None,
        }
    }

    /// Writes one payload towards the session's remote. TCP payloads are
    /// framed here so every egress path shares the RFC 4571 encoder.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ErrClosed);
        }
        match &self.writer {
            SessionWriter::Udp(socket) => {
                let n = socket.send_to(buf, self.remote.socket_addr()).await?;
                Ok(n)
            }
            SessionWriter::Tcp(sender) => {
                let framed = tcp_framing::frame_packet(buf)?;
                let n = framed.len();
                sender
                    .send(framed)
                    .await
                    .map_err(|_| Error::ErrClosed)?;
                Ok(n)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the session closed. For TCP the write half shuts down once
    /// the channel drains; the read pump notices EOF on its own.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for IceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceSession")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
