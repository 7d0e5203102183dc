//! # Envelope Codec
//!
//! The minimal framing unit carried inside mux `Data` packets:
//!
//! ```text
//! varint32(id) varint32(len) payload[len]
//! ```
//!
//! Envelopes know nothing about what their payload means. Decoding is a hard
//! validation boundary for untrusted input: it never panics and never allocates more
//! than the bytes it was handed.

use crate::core::packet::MAX_MUX_BODY_SIZE;
use crate::core::varint::{read_varint32, varint32_len, write_varint32};
use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Largest payload an envelope may declare. An envelope never outgrows the mux body
/// that carries it.
pub const MAX_ENVELOPE_PAYLOAD: usize = MAX_MUX_BODY_SIZE;

/// A message id and its raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub id: u32,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Size of this envelope on the wire
    pub fn encoded_len(&self) -> usize {
        encoded_parts_len(self.id, self.payload.len())
    }

    /// Append the encoded envelope to `dst`
    pub fn encode<B: BufMut>(&self, dst: &mut B) -> Result<()> {
        encode_parts(dst, self.id, &[&self.payload[..]])
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one envelope from the front of `src`, advancing it past the envelope.
    ///
    /// The payload is a zero-copy slice of `src`.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        let id = read_varint32(src)?;
        let len = read_varint32(src)? as usize;

        if len > MAX_ENVELOPE_PAYLOAD {
            return Err(ProtocolError::OversizedPacket(len));
        }

        if src.remaining() < len {
            return Err(ProtocolError::TruncatedInput);
        }

        let payload = src.split_to(len);
        Ok(Self { id, payload })
    }

    /// Decode exactly one envelope from `data`. Trailing bytes are an error.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut src = Bytes::copy_from_slice(data);
        let envelope = Self::decode(&mut src)?;
        if src.has_remaining() {
            return Err(ProtocolError::InvalidPacket(
                crate::error::constants::ERR_BODY_NOT_CONSUMED,
            ));
        }
        Ok(envelope)
    }

    /// Decode a concatenation of envelopes, as found in a mux `Data` body
    pub fn decode_all(mut body: Bytes) -> Result<Vec<Self>> {
        let mut envelopes = Vec::new();
        while body.has_remaining() {
            envelopes.push(Self::decode(&mut body)?);
        }
        Ok(envelopes)
    }
}

/// Write `varint(id) varint(total_len) parts...` where `total_len` is the summed length
/// of `parts`. Used for envelopes whose payload is assembled from several slices.
/// Wire size of an envelope with a `payload_len`-byte payload. A length that does not
/// fit the `u32` prefix saturates; encoding such a payload fails.
pub(crate) fn encoded_parts_len(id: u32, payload_len: usize) -> usize {
    let prefix = u32::try_from(payload_len).unwrap_or(u32::MAX);
    (varint32_len(id) + varint32_len(prefix)).saturating_add(payload_len)
}

pub(crate) fn encode_parts<B: BufMut>(dst: &mut B, id: u32, parts: &[&[u8]]) -> Result<()> {
    let total: usize = parts.iter().map(|p| p.len()).sum();
    let len = u32::try_from(total).map_err(|_| ProtocolError::OversizedPacket(total))?;

    write_varint32(dst, id);
    write_varint32(dst, len);
    for part in parts {
        dst.put_slice(part);
    }
    Ok(())
}

/// Encode an `(id, payload)` pair
pub fn encode(id: u32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(payload.len() + 10);
    encode_parts(&mut buf, id, &[payload])?;
    Ok(buf)
}

/// Decode one `(id, payload)` pair from the front of `src`
pub fn decode(src: &mut Bytes) -> Result<Envelope> {
    Envelope::decode(src)
}
