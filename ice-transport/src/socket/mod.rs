//! The socket wrapper: one logical endpoint owning its active session, a
//! bounded ring of stale sessions, the raw-message queue and an optional
//! relayed path.


use crate::classifier;
use crate::queue::RawMessageQueue;
use crate::session::{IceSession, SessionAttribute, CONNECTION};
use crate::stack::{DataFilter, RawMessage, RelayedConnection};
use crate::transport::tcp::IceTcpTransport;
use crate::transport::udp::IceUdpTransport;
use crate::transport::DEFAULT_TRANSPORT_ID;
use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use shared::error::{Error, Result};
use shared::{Datagram, TransportAddress, TransportProtocol};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How long a send waits for a session to come up before giving up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Promoted-away sessions kept around to absorb late writes.
pub const MAX_STALE_SESSIONS: usize = 8;

pub struct IceSocketWrapper {
    transport_id: String,
    transport_address: TransportAddress,
    session: Mutex<Option<Arc<IceSession>>>,
    stale_sessions: Mutex<VecDeque<Arc<IceSession>>>,
    raw_message_queue: RawMessageQueue,
    relayed_connection: Mutex<Option<Arc<dyn RelayedConnection>>>,
    filters: RwLock<Vec<Arc<dyn DataFilter>>>,
    closed: AtomicBool,
    connecting: AtomicBool,
    owns_binding: AtomicBool,
    connect_tx: watch::Sender<bool>,
    connect_rx: watch::Receiver<bool>,
}

impl IceSocketWrapper {
    /// Creates a wrapper for `local` on the shared acceptor instance. The
    /// transport variant is fixed by `local.transport` for the wrapper's
    /// lifetime.
    pub fn new(local: TransportAddress) -> Arc<Self> {
        Self::with_transport_id(local, DEFAULT_TRANSPORT_ID)
    }

    /// Creates a wrapper tied to a dedicated acceptor instance.
    pub fn with_transport_id(local: TransportAddress, transport_id: &str) -> Arc<Self> {
        let (connect_tx, connect_rx) = watch::channel(false);
        Arc::new(Self {
            transport_id: transport_id.to_owned(),
            transport_address: local,
            session: Mutex::new(None),
            stale_sessions: Mutex::new(VecDeque::new()),
            raw_message_queue: RawMessageQueue::default(),
            relayed_connection: Mutex::new(None),
            filters: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            owns_binding: AtomicBool::new(false),
            connect_tx,
            connect_rx,
        })
    }

    pub fn transport_address(&self) -> TransportAddress {
        self.transport_address
    }

    pub fn transport_id(&self) -> &str {
        &self.transport_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Arc<IceSession>> {
        self.session.lock().clone()
    }

    /// Routes everything but TURN control traffic through `relayed`.
    pub fn set_relayed_connection(&self, relayed: Arc<dyn RelayedConnection>) {
        *self.relayed_connection.lock() = Some(relayed);
    }

    /// Registers a predicate gating queue insertion.
    pub fn add_filter(&self, filter: Arc<dyn DataFilter>) {
        self.filters.write().push(filter);
    }

    /// Marks this wrapper as the owner of its acceptor binding, so closing
    /// it unbinds the port.
    pub(crate) fn set_owns_binding(&self) {
        self.owns_binding.store(true, Ordering::SeqCst);
    }

    /// Sends `buf` to `dest`, establishing a session first if none exists.
    ///
    /// This is the only operation that may suspend: when no session is up
    /// yet it waits on the connect latch for at most [`CONNECT_TIMEOUT`]
    /// and reports [`Error::ErrTimeout`] on expiry, leaving the wrapper
    /// usable for a retry.
    pub async fn send(self: &Arc<Self>, buf: &[u8], dest: TransportAddress) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ErrClosed);
        }
        let relayed = self.relayed_connection.lock().clone();
        if let Some(relayed) = relayed {
            if !classifier::is_turn_method(buf) {
                trace!("relayed send of {} bytes to {dest}", buf.len());
                return relayed.send(buf, dest);
            }
        }

        if let Some(session) = self.session() {
            if session.remote_address() == dest {
                return self.write_through(&session, buf).await;
            }
            // late write towards a replaced remote: first stale match wins
            let stale = self
                .stale_sessions
                .lock()
                .iter()
                .find(|s| s.remote_address() == dest)
                .cloned();
            if let Some(stale) = stale {
                trace!("sending to stale session: {dest}");
                let _ = stale.write(buf).await;
                return Ok(());
            }
            warn!("no session matching destination {dest}");
            return Err(Error::ErrNoSessionForDestination);
        }

        debug!(
            "no session, attempting connect from {} to {dest}",
            self.transport_address
        );
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.new_session(dest).await;
        }
        if !self.await_connect_latch().await {
            warn!("send failed due to connection timeout");
            return Err(Error::ErrTimeout);
        }
        match self.session() {
            Some(session) if session.remote_address() == dest => {
                self.write_through(&session, buf).await
            }
            _ => {
                warn!("send failed due to missing session");
                Err(Error::ErrNoSessionForDestination)
            }
        }
    }

    /// Convenience wrapper around [`send`](IceSocketWrapper::send).
    pub async fn send_datagram(self: &Arc<Self>, packet: &Datagram) -> Result<()> {
        self.send(&packet.data, packet.address).await
    }

    /// Non-blocking receive: copies the oldest queued message into
    /// `packet` and returns its length, or leaves `packet` untouched.
    pub fn receive(&self, packet: &mut Datagram) -> Option<usize> {
        let message = self.raw_message_queue.poll()?;
        let len = message.len();
        packet.data.clear();
        packet.data.extend_from_slice(message.bytes());
        packet.address = message.remote_address();
        Some(len)
    }

    /// Non-blocking receive of the oldest queued message.
    pub fn read(&self) -> Option<RawMessage> {
        self.raw_message_queue.poll()
    }

    /// Number of messages waiting in the queue.
    pub fn pending_messages(&self) -> usize {
        self.raw_message_queue.len()
    }

    #[cfg(test)]
    pub(crate) fn stale_session_count(&self) -> usize {
        self.stale_sessions.lock().len()
    }

    /// Makes sure the acceptor is bound on the local address and asks it
    /// for a session towards `dest` if none is active. Failures are
    /// logged, never propagated; the connect latch only fires once a
    /// session is installed.
    pub async fn new_session(self: &Arc<Self>, dest: TransportAddress) {
        debug!("new_session: {dest}");
        match self.transport_address.transport {
            TransportProtocol::UDP => {
                let Some(transport) = IceUdpTransport::get_instance(&self.transport_id) else {
                    debug!("no existing UDP acceptor available");
                    return;
                };
                if !transport.is_bound(self.transport_address.port) {
                    if let Err(err) = transport.add_binding(self.transport_address).await {
                        warn!("bind failed for {}: {err}", self.transport_address);
                        return;
                    }
                }
                if self.session().is_some() {
                    debug!("session already connected");
                    return;
                }
                match transport.new_session(dest, self.transport_address).await {
                    Ok(session) => self.adopt_session(session),
                    Err(err) => warn!(
                        "exception creating new session using acceptor for {}: {err}",
                        self.transport_address
                    ),
                }
            }
            TransportProtocol::TCP => {
                let Some(transport) = IceTcpTransport::get_instance(&self.transport_id) else {
                    debug!("no existing TCP acceptor available");
                    return;
                };
                if self.session().is_some() {
                    debug!("session already connected");
                    return;
                }
                match transport.connect(dest, self.transport_address).await {
                    Ok(session) => self.adopt_session(session),
                    Err(err) => warn!(
                        "exception creating new session using acceptor for {}: {err}",
                        self.transport_address
                    ),
                }
            }
        }
    }

    /// Takes ownership of a session the wrapper itself asked for. A
    /// wrapper that was never registered with the acceptor's handler still
    /// becomes the session's `CONNECTION` so inbound payloads reach its
    /// queue.
    fn adopt_session(self: &Arc<Self>, session: Arc<IceSession>) {
        if session.connection().is_none() {
            session.set_attribute(CONNECTION, SessionAttribute::Connection(self.clone()));
        }
        self.install_session(session);
    }

    /// Installs a session as the active one, moving any replaced session
    /// to the stale ring (oldest evicted) and firing the connect latch.
    pub(crate) fn install_session(&self, session: Arc<IceSession>) {
        let replaced = {
            let mut active = self.session.lock();
            let replaced = active.take().filter(|prev| !Arc::ptr_eq(prev, &session));
            *active = Some(session);
            replaced
        };
        if let Some(replaced) = replaced {
            debug!(
                "session {} promoted to stale on {}",
                replaced.id(),
                self.transport_address
            );
            let mut stale = self.stale_sessions.lock();
            if stale.len() >= MAX_STALE_SESSIONS {
                stale.pop_front();
            }
            stale.push_back(replaced);
        }
        let _ = self.connect_tx.send(true);
    }

    /// Removes a closed session: the active slot is vacated, stale copies
    /// are forgotten. The wrapper itself stays open.
    pub(crate) fn detach_session(&self, session: &Arc<IceSession>) {
        {
            let mut active = self.session.lock();
            if active.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
                *active = None;
            }
        }
        self.stale_sessions
            .lock()
            .retain(|s| !Arc::ptr_eq(s, session));
    }

    /// Runs the queue-insertion filters and enqueues the message. Drops
    /// (with a log line) on filter rejection, overflow or closed queue.
    pub(crate) fn offer_message(&self, message: RawMessage) {
        {
            let filters = self.filters.read();
            if !filters.iter().all(|f| f.accept(message.bytes())) {
                trace!(
                    "filter rejected {} bytes from {}",
                    message.len(),
                    message.remote_address()
                );
                return;
            }
        }
        if let Err(err) = self.raw_message_queue.offer(message) {
            warn!(
                "dropping message on {}: {err} ({} dropped so far)",
                self.transport_address,
                self.raw_message_queue.dropped()
            );
        }
    }

    /// Closes the wrapper: further sends fail with
    /// [`Error::ErrClosed`], the queue stops accepting but remains
    /// drainable, and the acceptor binding is removed if this wrapper owns
    /// it.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.raw_message_queue.close();
        {
            let mut active = self.session.lock();
            if let Some(session) = active.take() {
                session.close();
            }
        }
        self.stale_sessions.lock().clear();
        if self.owns_binding.load(Ordering::SeqCst) {
            match self.transport_address.transport {
                TransportProtocol::UDP => {
                    if let Some(transport) = IceUdpTransport::get_instance(&self.transport_id) {
                        transport.remove_binding(self.transport_address).await;
                    }
                }
                TransportProtocol::TCP => {
                    if let Some(transport) = IceTcpTransport::get_instance(&self.transport_id) {
                        transport.remove_binding(self.transport_address).await;
                    }
                }
            }
        }
        debug!("closed {}", self.transport_address);
    }

    async fn await_connect_latch(&self) -> bool {
        let mut latch = self.connect_rx.clone();
        if *latch.borrow_and_update() {
            return true;
        }
        tokio::time::timeout(CONNECT_TIMEOUT, latch.changed())
            .await
            .is_ok()
    }

    async fn write_through(&self, session: &Arc<IceSession>, buf: &[u8]) -> Result<()> {
        match session.write(buf).await {
            Ok(n) => {
                trace!("wrote {n} bytes to {}", session.remote_address());
                Ok(())
            }
            Err(err) => {
                warn!("write failed on session {}: {err}", session.id());
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for IceSocketWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceSocketWrapper")
            .field("local", &self.transport_address)
            .field("session", &self.session())
            .field("closed", &self.is_closed())
            .finish()
    }
}
