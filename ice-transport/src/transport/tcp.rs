//! The stream acceptor: a listener and accept loop per binding, one
//! session per connection, RFC 4571 framing on both directions.

#[cfg(test)]
mod tcp_test;

use crate::config::AcceptorConfig;
use crate::session::{IceSession, SessionWriter};
use crate::socket::IceSocketWrapper;
use crate::stack::StunStack;
use crate::transport::handler::{IceHandler, PendingAttach};
use crate::transport::{bind_tcp_listener, decoder, RECEIVE_MTU};
use bytes::BytesMut;
use lazy_static::lazy_static;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use shared::error::{Error, Result};
use shared::tcp_framing::TcpFrameDecoder;
use shared::TransportAddress;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Depth of the per-session write channel.
const WRITE_QUEUE_DEPTH: usize = 64;

lazy_static! {
    static ref TCP_TRANSPORTS: Mutex<HashMap<String, Arc<IceTcpTransport>>> =
        Mutex::new(HashMap::new());
}

pub(crate) struct TcpBinding {
    local: TransportAddress,
    sessions: Mutex<HashMap<SocketAddr, Arc<IceSession>>>,
    attach: Mutex<Option<PendingAttach>>,
    accept: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpBinding {
    fn new(local: TransportAddress) -> Self {
        Self {
            local,
            sessions: Mutex::new(HashMap::new()),
            attach: Mutex::new(None),
            accept: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn shutdown(&self, handler: &IceHandler, close_sessions: bool) {
        if let Some(accept) = self.accept.lock().take() {
            accept.abort();
        }
        if close_sessions {
            for task in self.tasks.lock().drain(..) {
                task.abort();
            }
            let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
            for session in sessions {
                session.close();
                handler.session_closed(&session);
            }
        }
    }
}

/// Process-wide TCP acceptor, registered like its UDP counterpart.
pub struct IceTcpTransport {
    id: String,
    config: AcceptorConfig,
    handler: IceHandler,
    bindings: Mutex<HashMap<TransportAddress, Arc<TcpBinding>>>,
}

impl IceTcpTransport {
    pub fn instance(id: &str) -> Arc<Self> {
        let mut transports = TCP_TRANSPORTS.lock();
        transports
            .entry(id.to_owned())
            .or_insert_with(|| {
                info!("started socket transport {id}");
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
        TCP_TRANSPORTS.lock().get(id).cloned()
    }

    pub async fn reset(id: &str) {
        let transport = { TCP_TRANSPORTS.lock().remove(id) };
        if let Some(transport) = transport {
            transport.stop().await;
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Binds a listener on `addr` and starts accepting. A port is bound at
    /// most once; binding an already-bound address fails.
    pub async fn add_binding(self: &Arc<Self>, addr: TransportAddress) -> Result<()> {
        if self.bindings.lock().contains_key(&addr) {
            return Err(Error::ErrBindFailed);
        }
        let listener = bind_tcp_listener(addr.socket_addr(), &self.config)?;
        let listener = TcpListener::from_std(listener)?;
        let binding = Arc::new(TcpBinding::new(addr));
        {
            let mut bindings = self.bindings.lock();
            if bindings.contains_key(&addr) {
                return Err(Error::ErrBindFailed);
            }
            bindings.insert(addr, binding.clone());
        }
        let accept = tokio::spawn(run_accept(self.clone(), binding.clone(), listener));
        *binding.accept.lock() = Some(accept);
        debug!("TCP binding added: {addr}");
        Ok(())
    }

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

    pub async fn remove_binding(&self, addr: TransportAddress) -> bool {
        let binding = { self.bindings.lock().remove(&addr) };
        match binding {
            Some(binding) => {
                binding.shutdown(&self.handler, true).await;
                debug!("TCP binding removed: {addr}");
                true
            }
            None => false,
        }
    }

    /// Originates a connection from `local` to `dest` and wraps it in a
    /// session. The local bind allows an active candidate to share its
    /// port with a listener via SO_REUSEADDR.
    pub async fn connect(
        self: &Arc<Self>,
        dest: TransportAddress,
        local: TransportAddress,
    ) -> Result<Arc<IceSession>> {
        let socket = if dest.is_ipv6() {
            TcpSocket::new_v6()?
        } else {
            TcpSocket::new_v4()?
        };
        if self.config.reuse_address {
            socket.set_reuseaddr(true)?;
        }
        socket.bind(local.socket_addr())?;
        let stream = socket.connect(dest.socket_addr()).await?;
        let binding = {
            let mut bindings = self.bindings.lock();
            bindings
                .entry(local)
                .or_insert_with(|| Arc::new(TcpBinding::new(local)))
                .clone()
        };
        Ok(self.open_stream_session(&binding, stream, dest.socket_addr()))
    }

    fn open_stream_session(
        self: &Arc<Self>,
        binding: &Arc<TcpBinding>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Arc<IceSession> {
        if let Err(err) = stream.set_nodelay(self.config.tcp_no_delay) {
            trace!("set_nodelay failed for {peer}: {err}");
        }
        let (read_half, write_half) = stream.into_split();
        let (sender, receiver) = mpsc::channel::<BytesMut>(WRITE_QUEUE_DEPTH);
        let session = IceSession::new(
            binding.local,
            TransportAddress::tcp(peer),
            SessionWriter::Tcp(sender),
        );
        binding.sessions.lock().insert(peer, session.clone());
        self.handler.session_opened(&session, &binding.attach);

        let writer = tokio::spawn(run_writer(session.clone(), write_half, receiver));
        let reader = tokio::spawn(run_reader(
            self.clone(),
            binding.clone(),
            session.clone(),
            read_half,
        ));
        binding.tasks.lock().extend([writer, reader]);
        session
    }

    pub async fn stop(&self) {
        let bindings: Vec<_> = { self.bindings.lock().drain().map(|(_, b)| b).collect() };
        for binding in bindings {
            binding
                .shutdown(&self.handler, self.config.close_on_deactivation)
                .await;
        }
        self.handler.clear_pending();
        info!("stopped socket transport {}", self.id);
    }
}

async fn run_accept(
    transport: Arc<IceTcpTransport>,
    binding: Arc<TcpBinding>,
    listener: TcpListener,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                trace!("accepted {peer} on {}", binding.local);
                transport.open_stream_session(&binding, stream, peer);
            }
            Err(err) => {
                warn!("accept failed on {}: {err}", binding.local);
                break;
            }
        }
    }
}

async fn run_writer(
    session: Arc<IceSession>,
    mut half: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<BytesMut>,
) {
    while let Some(framed) = receiver.recv().await {
        if let Err(err) = half.write_all(&framed).await {
            warn!("write failed on session {}: {err}", session.id());
            break;
        }
    }
}

async fn run_reader(
    transport: Arc<IceTcpTransport>,
    binding: Arc<TcpBinding>,
    session: Arc<IceSession>,
    mut half: OwnedReadHalf,
) {
    let mut deframer = TcpFrameDecoder::new();
    let mut buf = vec![0u8; RECEIVE_MTU];
    loop {
        match half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                deframer.extend_from_slice(&buf[..n]);
                while let Some(frame) = deframer.next_frame() {
                    decoder::decode(&session, frame);
                }
            }
            Err(err) => {
                transport
                    .handler
                    .exception_caught(&session, &Error::from(err));
                break;
            }
        }
    }
    session.close();
    binding
        .sessions
        .lock()
        .remove(&session.remote_address().socket_addr());
    transport.handler.session_closed(&session);
}
