//! # Mux Packets
//!
//! One TCP stream carries several logical channels. Every unit on the stream is a mux
//! packet with a fixed 6-byte little-endian header:
//!
//! ```text
//! [MuxId(2)] [BodySize(3)] [Command(1)] [Body(BodySize)]
//! ```
//!
//! Only `Data` packets carry a body of concatenated envelopes. Bodies of control
//! packets are consumed and discarded.

use crate::core::envelope::Envelope;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{EncodeContext, MessagePackage};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the mux header in bytes
pub const MUX_HEADER_SIZE: usize = 6;

/// Largest body the 24-bit size field can describe
pub const MAX_MUX_BODY_SIZE: usize = 0xFF_FFFF;

/// Mux control commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MuxCommand {
    Connect = 0x01,
    ConnectAck = 0x02,
    Disconnect = 0x03,
    ConnectWithData = 0x04,
    Data = 0x05,
}

impl TryFrom<u8> for MuxCommand {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MuxCommand::Connect),
            0x02 => Ok(MuxCommand::ConnectAck),
            0x03 => Ok(MuxCommand::Disconnect),
            0x04 => Ok(MuxCommand::ConnectWithData),
            0x05 => Ok(MuxCommand::Data),
            other => Err(ProtocolError::InvalidMuxCommand(other)),
        }
    }
}

/// Parsed fixed header of a mux packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxHeader {
    pub mux_id: u16,
    pub body_size: usize,
    pub command: MuxCommand,
}

impl MuxHeader {
    /// Parse a header from the first [`MUX_HEADER_SIZE`] bytes of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MUX_HEADER_SIZE {
            return Err(ProtocolError::TruncatedInput);
        }

        let mux_id = u16::from_le_bytes([data[0], data[1]]);
        let body_size =
            usize::from(data[2]) | usize::from(data[3]) << 8 | usize::from(data[4]) << 16;
        let command = MuxCommand::try_from(data[5])?;

        Ok(Self {
            mux_id,
            body_size,
            command,
        })
    }

    fn write_into(&self, dst: &mut [u8]) {
        let mux_id = self.mux_id.to_le_bytes();
        dst[0] = mux_id[0];
        dst[1] = mux_id[1];
        dst[2] = self.body_size as u8;
        dst[3] = (self.body_size >> 8) as u8;
        dst[4] = (self.body_size >> 16) as u8;
        dst[5] = self.command as u8;
    }
}

/// A mux packet: a channel id, a command, and for `Data` the messages it carries
#[derive(Debug, Clone)]
pub struct MuxPacket {
    mux_id: u16,
    command: MuxCommand,
    messages: Vec<MessagePackage>,
}

impl MuxPacket {
    /// Create a packet with no messages
    pub fn control(mux_id: u16, command: MuxCommand) -> Self {
        Self {
            mux_id,
            command,
            messages: Vec::new(),
        }
    }

    /// Create a `Data` packet carrying `messages`
    pub fn data(mux_id: u16, messages: Vec<MessagePackage>) -> Self {
        Self {
            mux_id,
            command: MuxCommand::Data,
            messages,
        }
    }

    #[inline]
    pub fn mux_id(&self) -> u16 {
        self.mux_id
    }

    #[inline]
    pub fn command(&self) -> MuxCommand {
        self.command
    }

    pub fn messages(&self) -> &[MessagePackage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<MessagePackage> {
        self.messages
    }

    /// Append a message. Only `Data` packets may carry messages.
    pub fn add_message(&mut self, message: MessagePackage) -> Result<()> {
        if self.command != MuxCommand::Data {
            return Err(ProtocolError::InvalidPacket(constants::ERR_NON_DATA_MESSAGES));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append the packet to `dst`. The body size is patched into the header once the
    /// messages are written.
    pub fn encode(&self, dst: &mut BytesMut, ctx: &EncodeContext) -> Result<()> {
        let start = dst.len();
        dst.put_bytes(0, MUX_HEADER_SIZE);

        for message in &self.messages {
            message.encode(dst, ctx)?;
        }

        let body_size = dst.len() - start - MUX_HEADER_SIZE;
        if body_size > MAX_MUX_BODY_SIZE {
            dst.truncate(start);
            return Err(ProtocolError::OversizedPacket(body_size));
        }

        MuxHeader {
            mux_id: self.mux_id,
            body_size,
            command: self.command,
        }
        .write_into(&mut dst[start..start + MUX_HEADER_SIZE]);

        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self, ctx: &EncodeContext) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(MUX_HEADER_SIZE + 64);
        self.encode(&mut buf, ctx)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one packet from `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut src = BytesMut::from(data);
        match Self::decode_frame(&mut src, MAX_MUX_BODY_SIZE)? {
            Some(packet) if src.is_empty() => Ok(packet),
            Some(_) => Err(ProtocolError::InvalidPacket(constants::ERR_BODY_NOT_CONSUMED)),
            None => Err(ProtocolError::TruncatedInput),
        }
    }

    /// Decode one packet from the front of a stream buffer.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched until the whole packet has arrived.
    /// The header is validated as soon as it is complete, so an unknown command or a
    /// body over `max_body_size` fails before the body is buffered.
    pub fn decode_frame(src: &mut BytesMut, max_body_size: usize) -> Result<Option<Self>> {
        if src.len() < MUX_HEADER_SIZE {
            return Ok(None);
        }

        let header = MuxHeader::parse(&src[..MUX_HEADER_SIZE])?;
        if header.body_size > max_body_size {
            return Err(ProtocolError::OversizedPacket(header.body_size));
        }

        let frame_len = MUX_HEADER_SIZE + header.body_size;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len).freeze();
        frame.advance(MUX_HEADER_SIZE);

        let messages = match header.command {
            MuxCommand::Data => Envelope::decode_all(frame)?
                .into_iter()
                .map(MessagePackage::from)
                .collect(),
            _ => Vec::new(),
        };

        Ok(Some(Self {
            mux_id: header.mux_id,
            command: header.command,
            messages,
        }))
    }
}
