//! Variable-length integer primitives.
//!
//! Little-endian base-128 varints: seven value bits per byte, high bit set on every byte
//! except the last. A 32-bit varint is at most 5 bytes and a 64-bit varint at most 10.
//! Signed values go through zig-zag encoding first so that small negative numbers stay
//! short.
//!
//! Readers never panic on untrusted input: running out of bytes is
//! [`ProtocolError::TruncatedInput`], and a varint that is too long or overflows its
//! width is [`ProtocolError::MalformedVarint`].

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut};

/// Maximum encoded size of a 32-bit varint
pub const MAX_VARINT32_BYTES: usize = 5;

/// Maximum encoded size of a 64-bit varint
pub const MAX_VARINT64_BYTES: usize = 10;

/// Number of bytes `value` occupies as a varint
#[inline]
pub fn varint32_len(value: u32) -> usize {
    varint64_len(u64::from(value))
}

/// Number of bytes `value` occupies as a varint
#[inline]
pub fn varint64_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

#[inline]
pub fn write_varint32<B: BufMut>(dst: &mut B, value: u32) {
    write_varint64(dst, u64::from(value));
}

pub fn write_varint64<B: BufMut>(dst: &mut B, mut value: u64) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

/// Read a 32-bit varint, consuming it from `src`
pub fn read_varint32<B: Buf>(src: &mut B) -> Result<u32> {
    let mut result: u32 = 0;

    for i in 0..MAX_VARINT32_BYTES {
        if !src.has_remaining() {
            return Err(ProtocolError::TruncatedInput);
        }

        let byte = src.get_u8();

        // Only the low four bits of the fifth byte fit in 32 bits
        if i == MAX_VARINT32_BYTES - 1 && byte & 0xF0 != 0 {
            return Err(ProtocolError::MalformedVarint);
        }

        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    Err(ProtocolError::MalformedVarint)
}

/// Read a 64-bit varint, consuming it from `src`
pub fn read_varint64<B: Buf>(src: &mut B) -> Result<u64> {
    let mut result: u64 = 0;

    for i in 0..MAX_VARINT64_BYTES {
        if !src.has_remaining() {
            return Err(ProtocolError::TruncatedInput);
        }

        let byte = src.get_u8();

        // The tenth byte only carries bit 63
        if i == MAX_VARINT64_BYTES - 1 && byte & 0xFE != 0 {
            return Err(ProtocolError::MalformedVarint);
        }

        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }

    Err(ProtocolError::MalformedVarint)
}

/// Map a signed value onto unsigned so that small magnitudes encode short
#[inline]
pub fn encode_zigzag64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn decode_zigzag64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
