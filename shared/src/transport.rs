use bytes::BytesMut;
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Type of transport protocol, either UDP or TCP.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransportProtocol {
    /// UDP
    #[default]
    UDP,
    /// TCP
    TCP,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::UDP => write!(f, "udp"),
            TransportProtocol::TCP => write!(f, "tcp"),
        }
    }
}

/// A transport-qualified socket address. Unlike a bare [`SocketAddr`] it
/// carries the protocol, so the same `ip:port` bound over UDP and TCP are
/// distinct endpoints and distinct map keys.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransportAddress {
    /// IP address, either IPv4 or IPv6
    pub ip: IpAddr,
    /// Port number
    pub port: u16,
    /// Transport protocol
    pub transport: TransportProtocol,
}

impl TransportAddress {
    pub fn new(ip: IpAddr, port: u16, transport: TransportProtocol) -> Self {
        Self {
            ip,
            port,
            transport,
        }
    }

    /// Builds a UDP-qualified address from a socket address.
    pub fn udp(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr, TransportProtocol::UDP)
    }

    /// Builds a TCP-qualified address from a socket address.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self::from_socket_addr(addr, TransportProtocol::TCP)
    }

    pub fn from_socket_addr(addr: SocketAddr, transport: TransportProtocol) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
            transport,
        }
    }

    /// The protocol-less socket address used for actual OS-level I/O.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip.is_ipv6()
    }
}

impl From<TransportAddress> for SocketAddr {
    fn from(value: TransportAddress) -> Self {
        value.socket_addr()
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.transport)
    }
}

/// An owned payload together with the peer address it came from or is bound
/// for. The socket wrapper's `send`/`receive` convenience surface works in
/// terms of datagrams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Payload bytes
    pub data: BytesMut,
    /// Remote peer address
    pub address: TransportAddress,
}

impl Datagram {
    pub fn new(data: BytesMut, address: TransportAddress) -> Self {
        Self { data, address }
    }
}

#[cfg(test)]
mod transport_test {
    use super::*;
    use std::collections::HashMap;
    use std::str::FromStr;

    #[test]
    fn test_transport_address_keying() {
        let addr = SocketAddr::from_str("10.0.0.1:3478").unwrap();
        let udp = TransportAddress::udp(addr);
        let tcp = TransportAddress::tcp(addr);
        assert_ne!(udp, tcp);

        let mut map = HashMap::new();
        map.insert(udp, "udp");
        map.insert(tcp, "tcp");
        assert_eq!(map.len(), 2);
        assert_eq!(map[&TransportAddress::udp(addr)], "udp");
    }

    #[test]
    fn test_transport_address_display() {
        let addr = SocketAddr::from_str("10.0.0.1:3478").unwrap();
        assert_eq!(
            TransportAddress::udp(addr).to_string(),
            "10.0.0.1:3478/udp".to_string()
        );
    }
}
