//! RFC 4571 length-prefix framing for STUN/DTLS/media over TCP.
//!
//! Every packet tunneled over a TCP candidate pair is preceded by a 16-bit
//! big-endian length. The encoder and decoder here are pure; the TCP
//! acceptor's read pump feeds the decoder and may receive frames split or
//! coalesced arbitrarily by the stream.

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Length of the RFC 4571 framing header.
pub const FRAMING_HEADER_LEN: usize = 2;

/// Largest payload expressible in the 16-bit length prefix.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Prefixes `payload` with its big-endian length.
pub fn frame_packet(payload: &[u8]) -> Result<BytesMut> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(Error::ErrFrameTooBig);
    }
    let mut framed = BytesMut::with_capacity(FRAMING_HEADER_LEN + payload.len());
    framed.put_u16(payload.len() as u16);
    framed.put_slice(payload);
    Ok(framed)
}

/// Incremental decoder for a framed TCP stream.
///
/// Bytes are appended as they arrive from the socket; [`next_frame`]
/// yields each complete payload (without its header) in stream order and
/// returns `None` while a frame is still partial.
///
/// [`next_frame`]: TcpFrameDecoder::next_frame
#[derive(Debug, Default)]
pub struct TcpFrameDecoder {
    buffer: BytesMut,
}

impl TcpFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends stream bytes to the reassembly buffer.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extracts the next complete payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<BytesMut> {
        if self.buffer.len() < FRAMING_HEADER_LEN {
            return None;
        }
        let frame_len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        if self.buffer.len() < FRAMING_HEADER_LEN + frame_len {
            return None;
        }
        let _ = self.buffer.split_to(FRAMING_HEADER_LEN);
        Some(self.buffer.split_to(frame_len))
    }

    /// Number of bytes awaiting a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tcp_framing_test {
    use super::*;

    #[test]
    fn test_frame_packet() -> Result<()> {
        let framed = frame_packet(b"binding")?;
        assert_eq!(framed.len(), FRAMING_HEADER_LEN + 7);
        assert_eq!(u16::from_be_bytes([framed[0], framed[1]]), 7);
        assert_eq!(&framed[FRAMING_HEADER_LEN..], b"binding");
        Ok(())
    }

    #[test]
    fn test_frame_packet_too_big() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        assert_eq!(frame_packet(&payload), Err(Error::ErrFrameTooBig));
    }

    #[test]
    fn test_decoder_handles_partial_reads() -> Result<()> {
        let mut decoder = TcpFrameDecoder::new();
        let framed = frame_packet(b"hello")?;

        decoder.extend_from_slice(&framed[..1]);
        assert!(decoder.next_frame().is_none());

        decoder.extend_from_slice(&framed[1..4]);
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.buffered_len(), 4);

        decoder.extend_from_slice(&framed[4..]);
        assert_eq!(decoder.next_frame().as_deref(), Some(&b"hello"[..]));
        assert!(decoder.is_empty());
        Ok(())
    }

    #[test]
    fn test_decoder_preserves_stream_order() -> Result<()> {
        let mut decoder = TcpFrameDecoder::new();
        for payload in [&b"first"[..], &b"second"[..], &b""[..], &b"fourth"[..]] {
            decoder.extend_from_slice(&frame_packet(payload)?);
        }

        assert_eq!(decoder.next_frame().as_deref(), Some(&b"first"[..]));
        assert_eq!(decoder.next_frame().as_deref(), Some(&b"second"[..]));
        assert_eq!(decoder.next_frame().as_deref(), Some(&b""[..]));
        assert_eq!(decoder.next_frame().as_deref(), Some(&b"fourth"[..]));
        assert!(decoder.next_frame().is_none());
        Ok(())
    }
}
