//! Per-transport acceptors and the I/O glue around them.
//!
//! Each transport has a process-wide acceptor registry keyed by an instance
//! id; [`DEFAULT_TRANSPORT_ID`] names the shared singleton. An acceptor
//! owns the OS sockets for its bindings, the receive pumps, and the
//! handler glue wiring sessions to socket wrappers.

pub(crate) mod decoder;
pub mod handler;
pub mod tcp;
pub mod udp;

use crate::config::AcceptorConfig;
use shared::error::Result;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

/// Instance id of the shared per-process acceptor.
pub const DEFAULT_TRANSPORT_ID: &str = "default";

/// Receive buffer size for one datagram or stream read.
pub(crate) const RECEIVE_MTU: usize = 8192;

/// Builds a configured, non-blocking UDP socket bound to `local`.
pub(crate) fn bind_udp_socket(
    local: SocketAddr,
    config: &AcceptorConfig,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if let Some(size) = config.send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = config.receive_buffer {
        socket.set_recv_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    Ok(socket.into())
}

/// Builds a configured, non-blocking TCP listener on `local`.
pub(crate) fn bind_tcp_listener(
    local: SocketAddr,
    config: &AcceptorConfig,
) -> Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(local), Type::STREAM, Some(Protocol::TCP))?;
    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if let Some(size) = config.send_buffer {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = config.receive_buffer {
        socket.set_recv_buffer_size(size)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    socket.listen(config.backlog)?;
    Ok(socket.into())
}
