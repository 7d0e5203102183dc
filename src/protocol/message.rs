//! # Message Packages
//!
//! A [`MessagePackage`] is an envelope tagged with the protocol context it belongs to.
//! Outbound server-to-client messages get a latency-compensation timestamp prepended to
//! their payload unless their id is exempt:
//!
//! ```text
//! varint(id) varint(len) [varint(zigzag(game_time_us))] payload
//! ```
//!
//! The timestamp is an encode-only concern. Inbound packages are never stripped.

use crate::core::envelope::{encode_parts, encoded_parts_len, Envelope};
use crate::core::varint::{
    decode_zigzag64, encode_zigzag64, read_varint64, varint64_len, write_varint64,
    MAX_VARINT64_BYTES,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::ProtocolDispatch;
use crate::utils::time::{to_micros, GameClock, SystemGameClock};
use bytes::{BufMut, Bytes};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Message-id namespace an envelope belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolContext {
    /// Frontend handshake messages exchanged on connect
    Frontend,
    /// Messages sent by a game client to the game server
    ClientToGameServer,
    /// Messages sent by the game server to a game client
    GameServerToClient,
    /// Chat and social messages
    GroupingManager,
}

/// State shared by every outbound encode: the game clock and the ids that are never
/// timestamped.
#[derive(Clone)]
pub struct EncodeContext {
    clock: Arc<dyn GameClock>,
    exempt_ids: Arc<HashSet<u32>>,
}

impl EncodeContext {
    pub fn new(clock: Arc<dyn GameClock>, exempt_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            clock,
            exempt_ids: Arc::new(exempt_ids.into_iter().collect()),
        }
    }

    /// Returns true if messages with this id are written without a timestamp
    #[inline]
    pub fn is_exempt(&self, id: u32) -> bool {
        self.exempt_ids.contains(&id)
    }

    pub fn clock(&self) -> &Arc<dyn GameClock> {
        &self.clock
    }

    /// Current game time in microseconds
    pub fn game_time_micros(&self) -> i64 {
        to_micros(self.clock.game_time())
    }
}

impl Default for EncodeContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemGameClock::new()), Vec::<u32>::new())
    }
}

impl fmt::Debug for EncodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeContext")
            .field("exempt_ids", &self.exempt_ids.len())
            .finish_non_exhaustive()
    }
}

/// An envelope plus the protocol context that gives its id meaning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePackage {
    protocol: Option<ProtocolContext>,
    pub id: u32,
    pub payload: Bytes,
    /// Game time at which the package was received (diagnostics only, never encoded)
    pub game_time_received: Duration,
    /// Wall-clock time at which the package was received (diagnostics only, never encoded)
    pub date_time_received: Duration,
}

impl MessagePackage {
    /// Create a package with no protocol context
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            protocol: None,
            id,
            payload: payload.into(),
            game_time_received: Duration::ZERO,
            date_time_received: Duration::ZERO,
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolContext) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn set_protocol(&mut self, protocol: ProtocolContext) {
        self.protocol = Some(protocol);
    }

    pub fn protocol(&self) -> Option<ProtocolContext> {
        self.protocol
    }

    /// Build an outbound package from a typed message
    pub fn from_message<D: ProtocolDispatch>(dispatch: &D, message: &D::Message) -> Result<Self> {
        let (protocol, id) = dispatch.protocol_id(message)?;
        let payload = dispatch.to_payload(message)?;
        Ok(Self::new(id, payload).with_protocol(protocol))
    }

    /// Stamp the receipt times from `clock`
    pub fn set_received_times(&mut self, clock: &dyn GameClock) {
        self.game_time_received = clock.game_time();
        self.date_time_received = clock.unix_time();
    }

    fn is_timestamped(&self, ctx: &EncodeContext) -> bool {
        self.protocol == Some(ProtocolContext::GameServerToClient) && !ctx.is_exempt(self.id)
    }

    /// Size of the package on the wire if encoded now
    pub fn encoded_len(&self, ctx: &EncodeContext) -> usize {
        let mut inner = self.payload.len();
        if self.is_timestamped(ctx) {
            inner += varint64_len(encode_zigzag64(ctx.game_time_micros()));
        }
        encoded_parts_len(self.id, inner)
    }

    /// Append the package to `dst`, timestamping it if required
    pub fn encode<B: BufMut>(&self, dst: &mut B, ctx: &EncodeContext) -> Result<()> {
        if !self.is_timestamped(ctx) {
            return encode_parts(dst, self.id, &[&self.payload[..]]);
        }

        let stamp = encode_zigzag64(ctx.game_time_micros());
        let mut buf = [0u8; MAX_VARINT64_BYTES];
        let stamp_len = varint64_len(stamp);
        let mut cursor = &mut buf[..];
        write_varint64(&mut cursor, stamp);

        encode_parts(dst, self.id, &[&buf[..stamp_len], &self.payload[..]])
    }

    /// Encode into a fresh buffer
    pub fn serialize(&self, ctx: &EncodeContext) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len(ctx));
        self.encode(&mut buf, ctx)?;
        Ok(buf)
    }

    /// Decode one package from the front of `src`. The protocol context is left unset
    /// for the owning layer to assign.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        Envelope::decode(src).map(Self::from)
    }

    /// Split a timestamped payload into its game time in microseconds and the inner
    /// payload. Only meaningful for packages encoded with a timestamp.
    pub fn split_timestamp(&self) -> Result<(i64, Bytes)> {
        let mut payload = self.payload.clone();
        let stamp = read_varint64(&mut payload)?;
        Ok((decode_zigzag64(stamp), payload))
    }

    /// Resolve the payload into a typed message.
    ///
    /// A missing protocol context, an unknown id and a decoder failure are all logged
    /// and yield `None`.
    pub fn deserialize<D: ProtocolDispatch>(&self, dispatch: &D) -> Option<D::Message> {
        let Some(protocol) = self.protocol else {
            warn!(id = self.id, error = %ProtocolError::MissingProtocol, "Cannot deserialize message");
            return None;
        };

        match dispatch.parse(protocol, self.id, &self.payload) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(id = self.id, protocol = ?protocol, error = %e, "Failed to deserialize message");
                None
            }
        }
    }
}

impl From<Envelope> for MessagePackage {
    fn from(envelope: Envelope) -> Self {
        Self::new(envelope.id, envelope.payload)
    }
}
