//! # Frontend Handshake
//!
//! Clients must finish a handshake on each gated channel before that channel's
//! traffic reaches a service. Until then every `Data` batch on the channel is tagged
//! [`ProtocolContext::Frontend`](crate::protocol::message::ProtocolContext::Frontend)
//! and handed to the application's [`FrontendHandshake`]. Admission to the game is
//! deferred until all gated channels of the connection are done.
//!
//! [`HandshakeTracker`] keeps the per-connection flags. It is shared by the I/O tasks
//! of every connection, so it is locked briefly per batch.

use crate::error::Result;
use crate::protocol::message::MessagePackage;
use crate::transport::frontend::FrontendClient;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Result of handling one pre-handshake message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Keep routing this channel to the handshake handler
    Pending,
    /// The handshake of `mux_id` is complete
    Finished { mux_id: u16 },
}

/// Application logic for the frontend protocol (credentials, initial handshakes).
pub trait FrontendHandshake: Send + Sync + 'static {
    /// Handle one message received on `mux_id` before its handshake finished.
    ///
    /// Replies go out through `client`. An error that fails validation disconnects the
    /// client; any other error is logged and the message dropped.
    fn handle(
        &self,
        client: &FrontendClient,
        mux_id: u16,
        message: MessagePackage,
    ) -> Result<HandshakeStatus>;
}

#[derive(Debug, Default)]
struct ClientHandshake {
    finished: Vec<u16>,
    admitted: bool,
}

/// Per-connection handshake flags for a fixed set of gated channels
#[derive(Debug)]
pub struct HandshakeTracker {
    required: Vec<u16>,
    clients: Mutex<HashMap<u64, ClientHandshake>>,
}

impl HandshakeTracker {
    pub fn new(required: impl IntoIterator<Item = u16>) -> Self {
        let mut required: Vec<u16> = required.into_iter().collect();
        required.sort_unstable();
        required.dedup();
        Self {
            required,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn required(&self) -> &[u16] {
        &self.required
    }

    pub fn is_gated(&self, mux_id: u16) -> bool {
        self.required.contains(&mux_id)
    }

    /// Whether traffic on `mux_id` may go to its service. Channels that are not gated
    /// are always open.
    pub fn is_finished(&self, client_id: u64, mux_id: u16) -> bool {
        if !self.is_gated(mux_id) {
            return true;
        }
        self.lock()
            .get(&client_id)
            .is_some_and(|state| state.finished.contains(&mux_id))
    }

    /// Whether every gated channel of the client is finished
    pub fn is_admitted(&self, client_id: u64) -> bool {
        self.lock().get(&client_id).is_some_and(|state| state.admitted)
    }

    /// Mark the handshake of `mux_id` finished.
    ///
    /// Returns `true` exactly once per connection: when the last gated channel finishes.
    /// Repeated or ungated completions change nothing.
    pub fn finish(&self, client_id: u64, mux_id: u16) -> bool {
        if !self.is_gated(mux_id) {
            debug!(client_id, mux_id, "Handshake finished on ungated channel");
            return false;
        }

        let mut clients = self.lock();
        let state = clients.entry(client_id).or_default();
        if state.finished.contains(&mux_id) {
            return false;
        }
        state.finished.push(mux_id);
        info!(client_id, mux_id, "Channel handshake finished");

        if state.admitted || state.finished.len() < self.required.len() {
            return false;
        }
        state.admitted = true;
        true
    }

    /// Forget a closed connection
    pub fn remove(&self, client_id: u64) {
        self.lock().remove(&client_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ClientHandshake>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
