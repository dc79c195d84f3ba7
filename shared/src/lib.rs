#![warn(rust_2018_idioms)]

pub mod error;
pub mod tcp_framing;
pub(crate) mod transport;

pub use transport::{Datagram, TransportAddress, TransportProtocol};
