use crate::error::{ProtocolError, Result};
use crate::protocol::message::ProtocolContext;
use std::collections::HashMap;

/// Resolves raw payloads into typed messages and back.
///
/// The message registry itself lives in the application; the transport only needs to
/// turn `(protocol, id, payload)` into a message on the way in and a message into
/// `(protocol, id, payload)` on the way out.
pub trait ProtocolDispatch: Send + Sync + 'static {
    type Message: Send + 'static;

    /// Decode `payload` as message `id` of `protocol`
    fn parse(&self, protocol: ProtocolContext, id: u32, payload: &[u8]) -> Result<Self::Message>;

    /// Protocol context and numeric id of `message`
    fn protocol_id(&self, message: &Self::Message) -> Result<(ProtocolContext, u32)>;

    /// Encoded payload of `message`
    fn to_payload(&self, message: &Self::Message) -> Result<Vec<u8>>;
}

/// A message type that knows its own wire identity
pub trait WireMessage: Send + 'static {
    fn protocol_id(&self) -> (ProtocolContext, u32);
    fn to_payload(&self) -> Result<Vec<u8>>;
}

type ParseFn<M> = dyn Fn(&[u8]) -> Result<M> + Send + Sync + 'static;

/// Dispatch table keyed by `(protocol, id)`.
///
/// Parsers are registered once at startup; the finished table is shared immutably,
/// typically behind an `Arc`.
pub struct DispatchTable<M> {
    parsers: HashMap<(ProtocolContext, u32), Box<ParseFn<M>>>,
}

impl<M: WireMessage> Default for DispatchTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: WireMessage> DispatchTable<M> {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Register the parser for one message id. Registering an id twice is an error.
    pub fn register<F>(&mut self, protocol: ProtocolContext, id: u32, parser: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        if self.parsers.contains_key(&(protocol, id)) {
            return Err(ProtocolError::ConfigError(format!(
                "Message {id} already registered for {protocol:?}"
            )));
        }

        self.parsers.insert((protocol, id), Box::new(parser));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, protocol: ProtocolContext, id: u32, parser: F) -> Result<Self>
    where
        F: Fn(&[u8]) -> Result<M> + Send + Sync + 'static,
    {
        self.register(protocol, id, parser)?;
        Ok(self)
    }

    pub fn contains(&self, protocol: ProtocolContext, id: u32) -> bool {
        self.parsers.contains_key(&(protocol, id))
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl<M: WireMessage> ProtocolDispatch for DispatchTable<M> {
    type Message = M;

    fn parse(&self, protocol: ProtocolContext, id: u32, payload: &[u8]) -> Result<M> {
        self.parsers
            .get(&(protocol, id))
            .ok_or(ProtocolError::UnknownMessage { protocol, id })
            .and_then(|parser| parser(payload))
    }

    fn protocol_id(&self, message: &M) -> Result<(ProtocolContext, u32)> {
        Ok(message.protocol_id())
    }

    fn to_payload(&self, message: &M) -> Result<Vec<u8>> {
        message.to_payload()
    }
}
