//! # Game Tick Loop
//!
//! [`Game`] is the single-threaded consumer of one game domain. Every tick it:
//!
//! 1. runs deferred entry work for sessions admitted on the previous tick,
//! 2. applies queued evictions, then admissions,
//! 3. drains the ingress mailbox and delivers each message to its session,
//! 4. flushes every session's outbound queue as one `Data` packet.
//!
//! I/O tasks talk to a running game only through a [`GameHandle`]. A game hosted by
//! the [`ServiceManager`](crate::service::manager::ServiceManager) is wrapped in a
//! [`GameInstanceService`], which runs the loop on a blocking thread.

use crate::config::GameConfig;
use crate::error::{ProtocolError, Result};
use crate::properties::replicated::ReplicationIdAllocator;
use crate::protocol::dispatcher::ProtocolDispatch;
use crate::protocol::message::{MessagePackage, ProtocolContext};
use crate::service::mailbox::{CoreNetworkMailbox, MessageList};
use crate::service::manager::{GameService, ServerType};
use crate::service::registry::{AdmissionQueues, ConnectionRegistry, Session};
use crate::transport::frontend::FrontendClient;
use crate::utils::metrics::Metrics;
use crate::utils::time::GameClock;
use futures::future::BoxFuture;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters published by the tick thread for status reports
#[derive(Debug, Default)]
pub struct GameStatus {
    sessions: AtomicUsize,
    frame: AtomicU64,
}

impl GameStatus {
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }
}

/// One game domain: its sessions, its mailbox and its tick
pub struct Game<C, S, D>
where
    S: Session,
    D: ProtocolDispatch<Message = S::Message>,
{
    registry: ConnectionRegistry<C, S>,
    mailbox: Arc<CoreNetworkMailbox<C, D>>,
    inbox: MessageList<C, S::Message>,
    replication_ids: Arc<ReplicationIdAllocator>,
    clock: Arc<dyn GameClock>,
    metrics: Arc<Metrics>,
    status: Arc<GameStatus>,
    metrics_interval: Duration,
    frame: u64,
}

impl<C, S, D> Game<C, S, D>
where
    C: Clone + Eq + Hash + fmt::Debug,
    S: Session,
    D: ProtocolDispatch<Message = S::Message>,
{
    /// `factory` builds the session of each newly admitted client
    pub fn new<F>(
        dispatch: Arc<D>,
        factory: F,
        config: &GameConfig,
        clock: Arc<dyn GameClock>,
        metrics: Arc<Metrics>,
    ) -> Self
    where
        F: FnMut(&C) -> S + Send + 'static,
    {
        let mailbox = CoreNetworkMailbox::new(dispatch).with_metrics(Arc::clone(&metrics));

        Self {
            registry: ConnectionRegistry::new(factory).with_metrics(Arc::clone(&metrics)),
            mailbox: Arc::new(mailbox),
            inbox: MessageList::new(),
            replication_ids: Arc::new(ReplicationIdAllocator::new(config.replication_id_start)),
            clock,
            metrics,
            status: Arc::new(GameStatus::default()),
            metrics_interval: config.metrics_interval,
            frame: 0,
        }
    }

    /// Handle for I/O tasks feeding this game
    pub fn handle(&self) -> GameHandle<C, D> {
        GameHandle {
            queues: self.registry.queues(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    pub fn status(&self) -> Arc<GameStatus> {
        Arc::clone(&self.status)
    }

    pub fn registry(&self) -> &ConnectionRegistry<C, S> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConnectionRegistry<C, S> {
        &mut self.registry
    }

    /// Allocator for replicated collections created by this game
    pub fn replication_ids(&self) -> Arc<ReplicationIdAllocator> {
        Arc::clone(&self.replication_ids)
    }

    pub fn dispatch(&self) -> &Arc<D> {
        self.mailbox.dispatch()
    }

    pub fn clock(&self) -> &Arc<dyn GameClock> {
        &self.clock
    }

    /// Ticks processed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Process one tick
    pub fn tick(&mut self) {
        self.registry.process_pending();
        self.registry.update();
        self.registry.receive_all_pending(&self.mailbox, &mut self.inbox);
        self.registry.send_all_pending();

        self.frame += 1;
        self.metrics.tick();
        self.status.frame.store(self.frame, Ordering::Relaxed);
        self.status.sessions.store(self.registry.len(), Ordering::Relaxed);
    }

    /// Tick every `tick_interval` until `token` is cancelled.
    ///
    /// Blocks the calling thread. Run it on a dedicated thread, never on an async
    /// worker.
    pub fn run(&mut self, token: &CancellationToken, tick_interval: Duration) {
        info!(interval_ms = tick_interval.as_millis() as u64, "Game loop started");
        let mut last_report = Instant::now();

        while !token.is_cancelled() {
            let started = Instant::now();
            self.tick();

            if !self.metrics_interval.is_zero() && last_report.elapsed() >= self.metrics_interval {
                self.metrics.log_metrics();
                last_report = Instant::now();
            }

            let elapsed = started.elapsed();
            match tick_interval.checked_sub(elapsed) {
                Some(remaining) => thread::sleep(remaining),
                None => debug!(
                    frame = self.frame,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Tick overran its interval"
                ),
            }
        }

        info!(frame = self.frame, sessions = self.registry.len(), "Game loop stopped");
    }
}

/// Cross-thread entry points into a running [`Game`]
pub struct GameHandle<C, D: ProtocolDispatch> {
    queues: Arc<AdmissionQueues<C>>,
    mailbox: Arc<CoreNetworkMailbox<C, D>>,
}

impl<C, D: ProtocolDispatch> Clone for GameHandle<C, D> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

impl<C: Clone, D: ProtocolDispatch> GameHandle<C, D> {
    /// Queue `client` for admission on the next tick
    pub fn add_client(&self, client: C) {
        self.queues.enqueue_admit(client);
    }

    /// Queue `client` for eviction on the next tick
    pub fn remove_client(&self, client: C) {
        self.queues.enqueue_evict(client);
    }

    /// Decode and queue one package. `false` means the package was rejected.
    pub fn post_message(&self, client: C, package: &MessagePackage) -> bool {
        self.mailbox.post(client, package)
    }

    /// Queue a batch received on one channel.
    ///
    /// Packages without a protocol are tagged with `protocol`. Stops at the first
    /// package that fails to decode; messages before it stay queued.
    pub fn post_messages(
        &self,
        client: &C,
        protocol: ProtocolContext,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        for mut package in messages {
            if package.protocol().is_none() {
                package.set_protocol(protocol);
            }
            if !self.mailbox.post(client.clone(), &package) {
                return Err(ProtocolError::DecodeFailed(format!(
                    "{protocol:?} message {}",
                    package.id
                )));
            }
        }
        Ok(())
    }

    pub fn mailbox(&self) -> &Arc<CoreNetworkMailbox<C, D>> {
        &self.mailbox
    }
}

/// A [`Game`] keyed by frontend connections, hosted as a managed service
pub struct GameInstanceService<S, D>
where
    S: Session,
    D: ProtocolDispatch<Message = S::Message>,
{
    game: Mutex<Option<Game<FrontendClient, S, D>>>,
    handle: GameHandle<FrontendClient, D>,
    status: Arc<GameStatus>,
    tick_interval: Duration,
}

impl<S, D> GameInstanceService<S, D>
where
    S: Session + Send + 'static,
    D: ProtocolDispatch<Message = S::Message>,
{
    pub fn new(game: Game<FrontendClient, S, D>, tick_interval: Duration) -> Self {
        Self {
            handle: game.handle(),
            status: game.status(),
            game: Mutex::new(Some(game)),
            tick_interval,
        }
    }

    pub fn handle(&self) -> &GameHandle<FrontendClient, D> {
        &self.handle
    }

    async fn run_game(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        let game = self
            .game
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut game) = game else {
            return Err(ProtocolError::ServiceError("game loop already started".into()));
        };

        let interval = self.tick_interval;
        tokio::task::spawn_blocking(move || game.run(&token, interval))
            .await
            .map_err(|e| ProtocolError::ServiceError(format!("game loop aborted: {e}")))
    }
}

impl<S, D> GameService for GameInstanceService<S, D>
where
    S: Session + Send + 'static,
    D: ProtocolDispatch<Message = S::Message>,
{
    fn server_type(&self) -> ServerType {
        ServerType::GameInstanceServer
    }

    fn run(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>> {
        Box::pin(self.run_game(token))
    }

    fn handle_messages(
        &self,
        client: &FrontendClient,
        _mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        let result = self
            .handle
            .post_messages(client, ProtocolContext::ClientToGameServer, messages);
        if let Err(e) = &result {
            warn!(client = ?client, error = %e, "Rejected game message");
        }
        result
    }

    fn on_client_connected(&self, client: &FrontendClient) {
        self.handle.add_client(client.clone());
    }

    fn on_client_disconnected(&self, client: &FrontendClient) {
        self.handle.remove_client(client.clone());
    }

    fn status(&self) -> String {
        format!(
            "{} sessions, frame {}",
            self.status.sessions(),
            self.status.frame()
        )
    }
}
