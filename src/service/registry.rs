//! # Connection Registry
//!
//! Owns the sessions of one game, keyed by client handle.
//!
//! I/O tasks never touch the session map. They queue admissions and evictions on the
//! shared [`AdmissionQueues`]; once per tick [`ConnectionRegistry::update`] swaps those
//! queues out under one short lock and applies them with no lock held, evictions first,
//! so a reconnecting client's old session is gone before its new one is created.

use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::ProtocolDispatch;
use crate::service::mailbox::{CoreNetworkMailbox, MailboxMessage, MessageList};
use crate::utils::metrics::Metrics;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Per-client game state owned by the tick thread
pub trait Session {
    /// Decoded inbound message type. Sessions move to the tick thread together with
    /// their queued messages.
    type Message: Send + 'static;

    /// Deferred setup, run on the tick after admission
    fn enter_game(&mut self) -> Result<()>;

    /// Handle one message from this client
    fn receive_message(&mut self, message: MailboxMessage<Self::Message>);

    /// Whether the session currently accepts traffic. Messages for a session that does
    /// not are dropped.
    fn can_send_or_receive(&self) -> bool {
        true
    }

    /// Best-effort cleanup before removal. Errors are logged and removal proceeds.
    fn on_disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Send everything queued for this client during the tick. Returning
    /// [`ProtocolError::ConnectionClosed`] schedules the session for eviction.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct PendingQueues<C> {
    admit: VecDeque<C>,
    evict: VecDeque<C>,
}

/// Admission and eviction requests queued by I/O tasks
#[derive(Debug)]
pub struct AdmissionQueues<C> {
    pending: Mutex<PendingQueues<C>>,
}

impl<C> AdmissionQueues<C> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingQueues {
                admit: VecDeque::new(),
                evict: VecDeque::new(),
            }),
        }
    }

    pub fn enqueue_admit(&self, client: C) {
        self.lock().admit.push_back(client);
    }

    pub fn enqueue_evict(&self, client: C) {
        self.lock().evict.push_back(client);
    }

    /// Exchange both queues with the caller's (empty) processing queues
    fn swap(&self, admit: &mut VecDeque<C>, evict: &mut VecDeque<C>) {
        let mut pending = self.lock();
        mem::swap(&mut pending.admit, admit);
        mem::swap(&mut pending.evict, evict);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingQueues<C>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Default for AdmissionQueues<C> {
    fn default() -> Self {
        Self::new()
    }
}

type SessionFactory<C, S> = Box<dyn FnMut(&C) -> S + Send>;

/// Session map of one game plus its admission pipeline
pub struct ConnectionRegistry<C, S> {
    sessions: HashMap<C, S>,
    queues: Arc<AdmissionQueues<C>>,
    admitting: VecDeque<C>,
    evicting: VecDeque<C>,
    pending_entry: VecDeque<C>,
    factory: SessionFactory<C, S>,
    metrics: Option<Arc<Metrics>>,
}

impl<C, S> ConnectionRegistry<C, S>
where
    C: Clone + Eq + Hash + fmt::Debug,
    S: Session,
{
    /// `factory` builds the session state for a newly admitted client
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(&C) -> S + Send + 'static,
    {
        Self {
            sessions: HashMap::new(),
            queues: Arc::new(AdmissionQueues::new()),
            admitting: VecDeque::new(),
            evicting: VecDeque::new(),
            pending_entry: VecDeque::new(),
            factory: Box::new(factory),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queues shared with the I/O side
    pub fn queues(&self) -> Arc<AdmissionQueues<C>> {
        Arc::clone(&self.queues)
    }

    pub fn get(&self, client: &C) -> Option<&S> {
        self.sessions.get(client)
    }

    pub fn get_mut(&mut self, client: &C) -> Option<&mut S> {
        self.sessions.get_mut(client)
    }

    pub fn contains(&self, client: &C) -> bool {
        self.sessions.contains_key(client)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> impl Iterator<Item = (&C, &S)> {
        self.sessions.iter()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = (&C, &mut S)> {
        self.sessions.iter_mut()
    }

    /// Number of admitted sessions still waiting for [`process_pending`](Self::process_pending)
    pub fn pending_count(&self) -> usize {
        self.pending_entry.len()
    }

    /// Apply queued evictions, then queued admissions
    pub fn update(&mut self) {
        self.queues.swap(&mut self.admitting, &mut self.evicting);

        while let Some(client) = self.evicting.pop_front() {
            self.evict(client);
        }

        while let Some(client) = self.admitting.pop_front() {
            self.admit(client);
        }
    }

    fn admit(&mut self, client: C) {
        if self.sessions.contains_key(&client) {
            warn!(client = ?client, error = %ProtocolError::DuplicateSession, "Admission ignored");
            if let Some(metrics) = &self.metrics {
                metrics.protocol_anomaly();
            }
            return;
        }

        let session = (self.factory)(&client);
        self.sessions.insert(client.clone(), session);
        self.pending_entry.push_back(client.clone());

        if let Some(metrics) = &self.metrics {
            metrics.session_admitted();
        }
        info!(client = ?client, "Session admitted");
    }

    fn evict(&mut self, client: C) {
        let Some(mut session) = self.sessions.remove(&client) else {
            debug!(client = ?client, "Eviction for unknown client");
            return;
        };

        if let Err(e) = session.on_disconnect() {
            warn!(client = ?client, error = %e, "Session cleanup failed");
        }

        if let Some(metrics) = &self.metrics {
            metrics.session_evicted();
        }
        info!(client = ?client, "Session evicted");
    }

    /// Run deferred setup for sessions admitted on an earlier update. A session whose
    /// setup fails is scheduled for eviction.
    pub fn process_pending(&mut self) {
        let pending = mem::take(&mut self.pending_entry);

        for client in pending {
            let Some(session) = self.sessions.get_mut(&client) else {
                continue;
            };

            if let Err(e) = session.enter_game() {
                warn!(client = ?client, error = %e, "Failed to enter game");
                self.queues.enqueue_evict(client);
            }
        }
    }

    /// Drain the mailbox into `list` and deliver each message to its session.
    ///
    /// Messages for unknown sessions or sessions that cannot receive are dropped.
    pub fn receive_all_pending<D>(
        &mut self,
        mailbox: &CoreNetworkMailbox<C, D>,
        list: &mut MessageList<C, S::Message>,
    ) where
        D: ProtocolDispatch<Message = S::Message>,
    {
        mailbox.drain(list);

        while let Some((client, message)) = list.pop_next() {
            match self.sessions.get_mut(&client) {
                Some(session) if session.can_send_or_receive() => session.receive_message(message),
                _ => debug!(client = ?client, id = message.id, "Dropped message for inactive client"),
            }
        }
    }

    /// Flush every session's outbound queue
    pub fn send_all_pending(&mut self) {
        for (client, session) in self.sessions.iter_mut() {
            match session.flush() {
                Ok(()) => {}
                Err(ProtocolError::ConnectionClosed) => {
                    debug!(client = ?client, "Connection closed during flush");
                    self.queues.enqueue_evict(client.clone());
                }
                Err(e) => warn!(client = ?client, error = %e, "Failed to flush session"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackedSession {
        log: Arc<Mutex<Vec<String>>>,
        entered: bool,
        fail_cleanup: bool,
        closed: bool,
        received: Vec<u32>,
    }

    impl Session for TrackedSession {
        type Message = u32;

        fn enter_game(&mut self) -> Result<()> {
            self.entered = true;
            Ok(())
        }

        fn receive_message(&mut self, message: MailboxMessage<u32>) {
            self.received.push(message.message);
        }

        fn can_send_or_receive(&self) -> bool {
            self.entered
        }

        fn on_disconnect(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("evict".to_string());
            if self.fail_cleanup {
                return Err(ProtocolError::Custom("cleanup failed".into()));
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            if self.closed {
                return Err(ProtocolError::ConnectionClosed);
            }
            Ok(())
        }
    }

    fn registry(log: Arc<Mutex<Vec<String>>>) -> ConnectionRegistry<u32, TrackedSession> {
        ConnectionRegistry::new(move |client: &u32| {
            log.lock().unwrap().push(format!("admit {client}"));
            TrackedSession {
                log: log.clone(),
                ..TrackedSession::default()
            }
        })
    }

    #[test]
    fn test_admission_waits_for_update() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry(log);
        let queues = registry.queues();

        queues.enqueue_admit(1);
        assert!(!registry.contains(&1));

        registry.update();
        assert!(registry.contains(&1));
        assert_eq!(registry.pending_count(), 1);
        assert!(!registry.get(&1).unwrap().entered);

        registry.process_pending();
        assert!(registry.get(&1).unwrap().entered);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_evict_then_admit_same_window() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = registry(log.clone());
        let queues = registry.queues();

        queues.enqueue_admit(5);
        registry.update();
        log.lock().unwrap().clear();

        // Reconnect: admission queued before the eviction still runs after it
        queues.enqueue_admit(5);
        queues.enqueue_evict(5);
        registry.update();

        assert_eq!(*log.lock().unwrap(), vec!["evict".to_string(), "admit 5".to_string()]);
        assert!(registry.contains(&5));
    }

    #[test]
    fn test_duplicate_admission_ignored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let metrics = Arc::new(Metrics::new());
        let mut registry = ConnectionRegistry::new(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            TrackedSession::default()
        })
        .with_metrics(metrics.clone());

        let queues = registry.queues();
        queues.enqueue_admit(1);
        queues.enqueue_admit(1);
        registry.update();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(metrics.snapshot().protocol_anomalies, 1);
        assert_eq!(metrics.snapshot().sessions_admitted, 1);
    }

    #[test]
    fn test_cleanup_failure_does_not_block_removal() {
        let mut registry = ConnectionRegistry::new(|_: &u32| TrackedSession {
            fail_cleanup: true,
            ..TrackedSession::default()
        });
        let queues = registry.queues();

        queues.enqueue_admit(1);
        registry.update();
        queues.enqueue_evict(1);
        registry.update();

        assert!(!registry.contains(&1));
    }

    #[test]
    fn test_closed_flush_schedules_eviction() {
        let mut registry = ConnectionRegistry::new(|_: &u32| TrackedSession::default());
        let queues = registry.queues();

        queues.enqueue_admit(1);
        queues.enqueue_admit(2);
        registry.update();
        registry.get_mut(&2).unwrap().closed = true;

        registry.send_all_pending();
        assert!(registry.contains(&2));

        registry.update();
        assert!(!registry.contains(&2));
        assert!(registry.contains(&1));
    }

    #[test]
    fn test_evict_unknown_client_is_harmless() {
        let mut registry = ConnectionRegistry::new(|_: &u32| TrackedSession::default());
        registry.queues().enqueue_evict(42);
        registry.update();
        assert!(registry.is_empty());
    }
}
