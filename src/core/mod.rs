//! # Core Protocol Components
//!
//! Low-level framing: varints, envelopes, mux packets and the stream codec.
//!
//! ## Components
//! - **Varint**: base-128 integers and zig-zag mapping
//! - **Envelope**: `(id, payload)` framing inside a mux body
//! - **Packet**: mux packet with a fixed channel header
//! - **Codec**: Tokio codec for framing mux packets over byte streams
//!
//! ## Wire Format
//! ```text
//! [MuxId(2)] [BodySize(3)] [Command(1)] [Envelope...]
//! Envelope: [varint Id] [varint Length] [Payload(Length)]
//! ```
//!
//! ## Security
//! - Maximum body size: 16MB - 1 (24-bit field), lowered per codec
//! - Declared lengths are validated before any allocation
//! - Decoding never panics on untrusted input

pub mod codec;
pub mod envelope;
pub mod packet;
pub mod varint;
