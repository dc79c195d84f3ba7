#![warn(rust_2018_idioms)]

//! The I/O and demultiplexing core of an ICE agent's transport layer.
//!
//! One bound endpoint carries STUN signaling, DTLS records and opaque media
//! on the same 5-tuple. Inbound bytes are classified ([`classifier`]),
//! STUN is parsed and fanned out to listeners ([`dispatcher`]), everything
//! else is queued on the owning socket wrapper ([`socket`]). Outbound
//! writes are routed through logical sessions owned by per-transport
//! acceptors ([`transport`]), with an optional relayed fallback. Host
//! candidates are gathered by [`harvest`].

pub mod candidate;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod harvest;
pub mod queue;
pub mod session;
pub mod socket;
pub mod stack;
pub mod transport;

pub use shared::error;
pub use shared::{Datagram, TransportAddress, TransportProtocol};
