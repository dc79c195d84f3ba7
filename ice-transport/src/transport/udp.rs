//! The datagram acceptor: one shared socket and receive pump per binding,
//! with per-remote sessions synthesized on first contact.

#[cfg(test)]
mod udp_test;

use crate::config::AcceptorConfig;
use crate::session::{IceSession, SessionWriter};
use crate::socket::IceSocketWrapper;
use crate::stack::StunStack;
use crate::transport::handler::{IceHandler, PendingAttach};
use crate::transport::{bind_udp_socket, decoder, RECEIVE_MTU};
use bytes::BytesMut;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::error::{Error, Result};
use shared::TransportAddress;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

lazy_static! {
    static ref UDP_TRANSPORTS: Mutex<HashMap<String, Arc<IceUdpTransport>>> =
        Mutex::new(HashMap::new());
}

pub(crate) struct UdpBinding {
    local: TransportAddress,
    socket: Arc<UdpSocket>,
    sessions: Mutex<HashMap<SocketAddr, Arc<IceSession>>>,
    attach: Mutex<Option<PendingAttach>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl UdpBinding {
    async fn shutdown(&self, handler: &IceHandler, close_sessions: bool) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if close_sessions {
            let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
            for session in sessions {
                session.close();
                handler.session_closed(&session);
            }
        }
    }
}

/// Process-wide UDP acceptor. `instance` creates on first use;
/// `get_instance` only looks up, so callers that merely *hope* for an
/// acceptor (the socket wrapper's connect path) don't conjure one.
pub struct IceUdpTransport {
    id: String,
    config: AcceptorConfig,
    handler: IceHandler,
    bindings: Mutex<HashMap<TransportAddress, Arc<UdpBinding>>>,
}

impl IceUdpTransport {
    pub fn instance(id: &str) -> Arc<Self> {
        let mut transports = UDP_TRANSPORTS.lock();
        transports
            .entry(id.to_owned())
            .or_insert_with(|| {
                info!("started datagram transport {id}");
                Arc::new(Self {
                    id: id.to_owned(),
                    config: AcceptorConfig::from_env(),
                    handler: IceHandler::new(),
                    bindings: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }

    pub fn get_instance(id: &str) -> Option<Arc<Self>> {
        UDP_TRANSPORTS.lock().get(id).cloned()
    }

    /// Stops and unregisters the instance. Used on teardown and between
    /// tests.
    pub async fn reset(id: &str) {
        let transport = { UDP_TRANSPORTS.lock().remove(id) };
        if let Some(transport) = transport {
            transport.stop().await;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Binds `addr` and starts its receive pump. A port is bound at most
    /// once; binding an already-bound address fails.
    pub async fn add_binding(self: &Arc<Self>, addr: TransportAddress) -> Result<()> {
        if self.bindings.lock().contains_key(&addr) {
            return Err(Error::ErrBindFailed);
        }
        let socket = bind_udp_socket(addr.socket_addr(), &self.config)?;
        let socket = Arc::new(UdpSocket::from_std(socket)?);
        let binding = Arc::new(UdpBinding {
            local: addr,
            socket,
            sessions: Mutex::new(HashMap::new()),
            attach: Mutex::new(None),
            pump: Mutex::new(None),
        });
        {
            let mut bindings = self.bindings.lock();
            if bindings.contains_key(&addr) {
                return Err(Error::ErrBindFailed);
            }
            bindings.insert(addr, binding.clone());
        }
        let pump = tokio::spawn(run_pump(self.clone(), binding.clone()));
        *binding.pump.lock() = Some(pump);
        debug!("UDP binding added: {addr}");
        Ok(())
    }

    /// Stashes the stack/wrapper pair for attachment at first session open
    /// and makes sure the wrapper's address is bound.
    pub async fn add_binding_with(
        self: &Arc<Self>,
        stack: Arc<dyn StunStack>,
        wrapper: Arc<IceSocketWrapper>,
    ) -> Result<()> {
        self.handler.add_stack_and_socket(stack, wrapper.clone());
        if self.bindings.lock().contains_key(&wrapper.transport_address()) {
            return Ok(());
        }
        self.add_binding(wrapper.transport_address()).await
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.bindings.lock().keys().any(|addr| addr.port == port)
    }

    /// Unbinds `addr`, stopping its pump and closing its sessions.
    pub async fn remove_binding(&self, addr: TransportAddress) -> bool {
        let binding = { self.bindings.lock().remove(&addr) };
        match binding {
            Some(binding) => {
                binding.shutdown(&self.handler, true).await;
                debug!("UDP binding removed: {addr}");
                true
            }
            None => false,
        }
    }

    /// Synthesizes (or returns) the logical session `(dest, local)`.
    pub async fn new_session(
        &self,
        dest: TransportAddress,
        local: TransportAddress,
    ) -> Result<Arc<IceSession>> {
        let binding = self
            .bindings
            .lock()
            .get(&local)
            .cloned()
            .ok_or(Error::ErrNoAcceptor)?;
        Ok(self.session_for(&binding, dest.socket_addr()))
    }

    fn session_for(&self, binding: &Arc<UdpBinding>, peer: SocketAddr) -> Arc<IceSession> {
        let (session, opened) = {
            let mut sessions = binding.sessions.lock();
            match sessions.get(&peer) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let session = IceSession::new(
                        binding.local,
                        TransportAddress::udp(peer),
                        SessionWriter::Udp(binding.socket.clone()),
                    );
                    sessions.insert(peer, session.clone());
                    (session, true)
                }
            }
        };
        if opened {
            self.handler.session_opened(&session, &binding.attach);
        }
        session
    }

    /// Unbinds everything and drops pending attachments.
    pub async fn stop(&self) {
        let bindings: Vec<_> = { self.bindings.lock().drain().map(|(_, b)| b).collect() };
        for binding in bindings {
            binding
                .shutdown(&self.handler, self.config.close_on_deactivation)
                .await;
        }
        self.handler.clear_pending();
        info!("stopped datagram transport {}", self.id);
    }
}

async fn run_pump(transport: Arc<IceUdpTransport>, binding: Arc<UdpBinding>) {
    let mut buf = vec![0u8; RECEIVE_MTU];
    loop {
        match binding.socket.recv_from(&mut buf).await {
            Ok((n, peer)) => {
                let session = transport.session_for(&binding, peer);
                decoder::decode(&session, BytesMut::from(&buf[..n]));
            }
            Err(err) => {
                warn!("receive failed on {}: {err}", binding.local);
                break;
            }
        }
    }
}
