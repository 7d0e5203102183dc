//! # Ingress Mailbox
//!
//! The only path from network I/O tasks into the game tick. Producers on any thread
//! [`post`](CoreNetworkMailbox::post) packages; the tick thread
//! [`drain`](CoreNetworkMailbox::drain)s them in one batch.
//!
//! Decoding happens on the producer side, outside the lock, so the critical section is a
//! single push. A package that fails to decode is never queued: `post` returns `false`
//! and the caller must drop the connection.

use crate::protocol::dispatcher::ProtocolDispatch;
use crate::protocol::message::MessagePackage;
use crate::utils::metrics::Metrics;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A decoded message and its receipt times
#[derive(Debug, Clone)]
pub struct MailboxMessage<M> {
    pub id: u32,
    pub message: M,
    pub game_time_received: Duration,
    pub date_time_received: Duration,
}

/// Batch of drained messages, consumed by the tick thread.
///
/// Keep one list around and reuse it every tick; draining appends without reallocating
/// once the list has grown to the usual batch size.
#[derive(Debug)]
pub struct MessageList<C, M> {
    items: VecDeque<(C, MailboxMessage<M>)>,
}

impl<C, M> MessageList<C, M> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.items.is_empty()
    }

    /// Next message in arrival order
    pub fn pop_next(&mut self) -> Option<(C, MailboxMessage<M>)> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(C, MailboxMessage<M>)> {
        self.items.iter()
    }
}

impl<C, M> Default for MessageList<C, M> {
    fn default() -> Self {
        Self::new()
    }
}

type Queue<C, M> = VecDeque<(C, MailboxMessage<M>)>;

/// Multi-producer, single-consumer queue of decoded client messages
pub struct CoreNetworkMailbox<C, D: ProtocolDispatch> {
    dispatch: Arc<D>,
    queue: Mutex<Queue<C, D::Message>>,
    metrics: Option<Arc<Metrics>>,
}

impl<C, D: ProtocolDispatch> CoreNetworkMailbox<C, D> {
    pub fn new(dispatch: Arc<D>) -> Self {
        Self {
            dispatch,
            queue: Mutex::new(VecDeque::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn dispatch(&self) -> &Arc<D> {
        &self.dispatch
    }

    /// Decode `package` and queue it for `client`.
    ///
    /// Returns `false` without queueing anything if the package does not decode.
    pub fn post(&self, client: C, package: &MessagePackage) -> bool {
        let Some(message) = package.deserialize(self.dispatch.as_ref()) else {
            if let Some(metrics) = &self.metrics {
                metrics.validation_failure();
            }
            return false;
        };

        let item = MailboxMessage {
            id: package.id,
            message,
            game_time_received: package.game_time_received,
            date_time_received: package.date_time_received,
        };

        self.lock().push_back((client, item));
        true
    }

    /// Move every queued message into `list`, leaving the mailbox empty
    pub fn drain(&self, list: &mut MessageList<C, D::Message>) {
        let mut queue = self.lock();
        list.items.append(&mut queue);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The queue holds plain data, so a panic elsewhere never leaves it inconsistent
    fn lock(&self) -> MutexGuard<'_, Queue<C, D::Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
