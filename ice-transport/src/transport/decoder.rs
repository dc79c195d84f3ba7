//! The protocol decoder shared by the UDP and TCP receive pumps: the only
//! component that ever sees raw inbound bytes. STUN goes to the session's
//! stack as a parsed event; DTLS records and opaque payloads go to the
//! owning wrapper's queue as [`RawMessage`]s.


use crate::classifier::{self, PacketClass};
use crate::session::IceSession;
use crate::stack::{RawMessage, StunMessageEvent};
use bytes::BytesMut;
use log::{trace, warn};
use std::sync::Arc;
use stun::message::Message;

pub(crate) fn decode(session: &Arc<IceSession>, buf: BytesMut) {
    let local = session.local_address();
    let remote = session.remote_address();
    match classifier::classify(&buf) {
        PacketClass::Stun => {
            trace!("dispatching a STUN message from {remote}");
            let raw = RawMessage::build(buf, remote, local);
            let mut message = Message {
                raw: vec![],
                ..Message::default()
            };
            message.raw.extend_from_slice(raw.bytes());
            match message.decode() {
                Ok(()) => match session.stun_stack() {
                    Some(stack) => stack.handle_message_event(StunMessageEvent::new(message, raw)),
                    None => warn!("no stun stack attached to session {}", session.id()),
                },
                Err(err) => warn!("failed to decode a stun message: {err}"),
            }
        }
        PacketClass::Dtls => {
            for record in classifier::split_dtls_records(&buf) {
                if let Some(version) = classifier::dtls_version(&record) {
                    trace!("queueing DTLS {version} record of {} bytes", record.len());
                }
                offer(session, RawMessage::build(record, remote, local));
            }
        }
        PacketClass::Opaque => offer(session, RawMessage::build(buf, remote, local)),
        PacketClass::TooShort => warn!(
            "not enough data in the buffer to parse: {} bytes from {remote}",
            buf.len()
        ),
    }
}

fn offer(session: &Arc<IceSession>, message: RawMessage) {
    match session.connection() {
        Some(wrapper) => wrapper.offer_message(message),
        None => warn!("no ice socket in session {}", session.id()),
    }
}
