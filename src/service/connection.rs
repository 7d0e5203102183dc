//! Per-session outbound batching.
//!
//! Messages a session produces during a tick are queued here and leave as a single
//! `Data` packet when the tick flushes, in the order they were posted.

use crate::error::Result;
use crate::protocol::dispatcher::ProtocolDispatch;
use crate::protocol::message::MessagePackage;
use crate::protocol::mux::CHANNEL_GAME;
use crate::transport::frontend::FrontendClient;
use std::mem;

#[derive(Debug)]
pub struct OutboundQueue {
    client: FrontendClient,
    mux_id: u16,
    pending: Vec<MessagePackage>,
}

impl OutboundQueue {
    /// Queue for the game channel of `client`
    pub fn new(client: FrontendClient) -> Self {
        Self::on_channel(client, CHANNEL_GAME)
    }

    pub fn on_channel(client: FrontendClient, mux_id: u16) -> Self {
        Self {
            client,
            mux_id,
            pending: Vec::new(),
        }
    }

    pub fn client(&self) -> &FrontendClient {
        &self.client
    }

    pub fn mux_id(&self) -> u16 {
        self.mux_id
    }

    pub fn post(&mut self, package: MessagePackage) {
        self.pending.push(package);
    }

    /// Encode a typed message through `dispatch` and queue it
    pub fn post_message<D: ProtocolDispatch>(&mut self, dispatch: &D, message: &D::Message) -> Result<()> {
        self.post(MessagePackage::from_message(dispatch, message)?);
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send everything queued as one `Data` packet. Nothing is sent when the queue is
    /// empty.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let messages = mem::take(&mut self.pending);
        self.client.send_messages(self.mux_id, messages)
    }

    /// Drop anything queued and close the connection
    pub fn disconnect(&mut self) {
        self.pending.clear();
        self.client.disconnect();
    }
}
