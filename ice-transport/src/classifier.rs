//! First-bytes protocol classification for the shared ICE endpoint.
//!
//! Everything arriving on a bound port flows through [`classify`] before it
//! is parsed, queued or dropped. The checks deliberately look at as few
//! bytes as possible and never fail: unrecognizable input is `Opaque`,
//! undersized input is `TooShort`.


use bytes::BytesMut;
use log::{trace, warn};
use stun::attributes::ATTR_USERNAME;
use stun::message::{Getter, Message, BINDING_REQUEST};
use stun::textattrs::Username;

/// Length of the fixed STUN message header (RFC 5389, section 6).
pub const STUN_HEADER_LENGTH: usize = 20;

/// Length of a DTLS record header.
pub const DTLS_RECORD_HEADER_LENGTH: usize = 13;

/// The RFC 5389 magic cookie, big-endian.
pub const MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xA4, 0x42];

// STUN methods admitted by the classifier. The legacy request method 0x0000
// and the shared-secret request 0x0002 predate RFC 5389 but still appear on
// the wire from old stacks.
const STUN_METHOD_LEGACY_REQUEST: u8 = 0x00;
const STUN_METHOD_BINDING: u8 = 0x01;
const STUN_METHOD_SHARED_SECRET: u8 = 0x02;

// DTLS content types (RFC 2246 6.2.1 plus heartbeat).
const DTLS_CHANGE_CIPHER_SPEC: u8 = 20;
const DTLS_HEARTBEAT: u8 = 24;

/// Verdict of [`classify`] on one inbound buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketClass {
    /// A STUN message the processing stack should parse.
    Stun,
    /// One or more DTLS records.
    Dtls,
    /// Anything else (application media); forwarded verbatim.
    Opaque,
    /// Too small to even hold a DTLS record header.
    TooShort,
}

/// Classifies the buffer by its first bytes.
pub fn classify(buf: &[u8]) -> PacketClass {
    if buf.len() <= DTLS_RECORD_HEADER_LENGTH {
        PacketClass::TooShort
    } else if is_stun(buf) {
        PacketClass::Stun
    } else if is_dtls(buf) {
        PacketClass::Dtls
    } else {
        PacketClass::Opaque
    }
}

/// Extracts the method from the first two header bytes, stripping the two
/// class bits (0x0100 lives in byte 0, 0x0010 in byte 1).
fn method_of(buf: &[u8]) -> u8 {
    (buf[0] & 0xFE) | (buf[1] & 0xEF)
}

/// Determines whether the buffer looks like a STUN message.
///
/// Accepts RFC 5389 messages (magic cookie present) as well as RFC 3489
/// ones (top two bits of the first byte zero and the header length field
/// consistent with the buffer length). Structural acceptance is then
/// narrowed to the binding, legacy-request and shared-secret methods;
/// anything else is left for the opaque path.
pub fn is_stun(buf: &[u8]) -> bool {
    if buf.len() < STUN_HEADER_LENGTH {
        return false;
    }
    let structurally_stun = if buf[4..8] == MAGIC_COOKIE {
        true
    } else {
        let header_length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        (buf[0] & 0xC0) == 0 && buf.len() == STUN_HEADER_LENGTH + header_length
    };
    if !structurally_stun {
        return false;
    }
    matches!(
        method_of(buf),
        STUN_METHOD_LEGACY_REQUEST | STUN_METHOD_BINDING | STUN_METHOD_SHARED_SECRET
    )
}

/// Determines whether the buffer starts a DTLS record: the first byte falls
/// strictly between 19 and 64 (RFC 7983).
pub fn is_dtls(buf: &[u8]) -> bool {
    !buf.is_empty() && buf[0] > 19 && buf[0] < 64
}

/// Determines whether the buffer is a TURN control-plane message
/// (allocate, refresh, send, data, create-permission or channel-bind).
/// Used to keep TURN signaling off the relayed data path.
pub fn is_turn_method(buf: &[u8]) -> bool {
    buf.len() >= 2 && matches!(method_of(buf), 0x03..=0x09)
}

/// Splits a buffer of back-to-back DTLS records into owned records, each
/// `13 + u16be(record[11..13])` bytes long, preserving on-wire order.
///
/// A truncated trailing record is logged and dropped; the records before it
/// are still returned.
pub fn split_dtls_records(buf: &[u8]) -> Vec<BytesMut> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset + DTLS_RECORD_HEADER_LENGTH < buf.len() {
        let payload_length =
            u16::from_be_bytes([buf[offset + 11], buf[offset + 12]]) as usize;
        let record_length = DTLS_RECORD_HEADER_LENGTH + payload_length;
        if offset + record_length > buf.len() {
            warn!(
                "truncated DTLS record: want {} bytes, {} remain",
                record_length,
                buf.len() - offset
            );
            break;
        }
        records.push(BytesMut::from(&buf[offset..offset + record_length]));
        offset += record_length;
    }
    records
}

/// Probes the DTLS protocol version of the record at the start of `buf`.
///
/// Returns `"1.0"` or `"1.2"`; unknown versions and content types are
/// logged and yield `None`, they are not an error.
pub fn dtls_version(buf: &[u8]) -> Option<&'static str> {
    if buf.len() < DTLS_RECORD_HEADER_LENGTH {
        return None;
    }
    if !(DTLS_CHANGE_CIPHER_SPEC..=DTLS_HEARTBEAT).contains(&buf[0]) {
        trace!("unhandled content type: {}", buf[0]);
        return None;
    }
    match (buf[1], buf[2]) {
        (254, 255) => Some("1.0"),
        (254, 253) => Some("1.2"),
        (major, minor) => {
            trace!("unhandled DTLS version: {major}.{minor}");
            None
        }
    }
}

/// Tries to parse `buf` as a STUN binding request and, if it carries a
/// USERNAME attribute, returns the local username fragment: the part before
/// the first colon (RFC 5245, section 7.1.2.3). Any failure yields `None`.
pub fn get_ufrag(buf: &[u8]) -> Option<String> {
    if buf.len() < STUN_HEADER_LENGTH || buf[4..8] != MAGIC_COOKIE {
        trace!("not a STUN packet, magic cookie not found");
        return None;
    }
    let mut message = Message {
        raw: vec![],
        ..Message::default()
    };
    message.raw.extend_from_slice(buf);
    if let Err(err) = message.decode() {
        warn!("failed to extract local ufrag: {err}");
        return None;
    }
    if message.typ != BINDING_REQUEST {
        return None;
    }
    let mut username = Username::new(ATTR_USERNAME, String::new());
    if username.get_from(&message).is_err() {
        return None;
    }
    let username = username.to_string();
    match username.split_once(':') {
        Some((local, _)) => Some(local.to_owned()),
        None => Some(username),
    }
}
