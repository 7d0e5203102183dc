//! # Service Manager
//!
//! Context object that owns every service of the process. It is built once at startup,
//! shared as `Arc<ServiceManager>`, and ties service lifetimes to the process:
//! [`run_services`](ServiceManager::run_services) drives them all and
//! [`shutdown_services`](ServiceManager::shutdown_services) cancels them.
//!
//! If any service stops with an error or panics, the manager cancels the others so the
//! process winds down in order.

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{MessagePackage, ProtocolContext};
use crate::protocol::mux::{CHANNEL_CHAT, CHANNEL_GAME};
use crate::service::handshake::{FrontendHandshake, HandshakeStatus, HandshakeTracker};
use crate::transport::frontend::{FrontendClient, FrontendHandler};
use crate::utils::metrics::Metrics;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Kinds of service a process can host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerType {
    FrontendServer,
    AuthServer,
    PlayerManager,
    GroupingManager,
    GameInstanceServer,
    Billing,
    Leaderboard,
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A long-running service managed by [`ServiceManager`]
pub trait GameService: Send + Sync + 'static {
    fn server_type(&self) -> ServerType;

    /// Run until `token` is cancelled or the service fails
    fn run(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>>;

    /// Messages routed to this service from a client channel
    fn handle_messages(
        &self,
        _client: &FrontendClient,
        mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        warn!(
            service = %self.server_type(),
            mux_id,
            count = messages.len(),
            "Service does not accept client messages"
        );
        Ok(())
    }

    fn on_client_connected(&self, _client: &FrontendClient) {}

    fn on_client_disconnected(&self, _client: &FrontendClient) {}

    /// One-line human-readable status
    fn status(&self) -> String;
}

/// Registry and lifecycle owner of all services
pub struct ServiceManager {
    services: RwLock<HashMap<ServerType, Arc<dyn GameService>>>,
    token: CancellationToken,
    started: Mutex<Option<Instant>>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            token: CancellationToken::new(),
            started: Mutex::new(None),
        }
    }

    /// Token cancelled by [`shutdown_services`](Self::shutdown_services)
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a service under its server type. Each type may be registered once.
    pub fn register(&self, service: Arc<dyn GameService>) -> Result<()> {
        let server_type = service.server_type();
        let mut services = self.write();

        if services.contains_key(&server_type) {
            return Err(ProtocolError::ServiceError(format!(
                "{}: {server_type}",
                constants::ERR_SERVICE_REGISTERED
            )));
        }

        services.insert(server_type, service);
        info!(service = %server_type, "Service registered");
        Ok(())
    }

    pub fn unregister(&self, server_type: ServerType) -> Option<Arc<dyn GameService>> {
        let removed = self.write().remove(&server_type);
        if removed.is_some() {
            info!(service = %server_type, "Service unregistered");
        }
        removed
    }

    pub fn get(&self, server_type: ServerType) -> Option<Arc<dyn GameService>> {
        self.read().get(&server_type).cloned()
    }

    pub fn registered(&self) -> Vec<ServerType> {
        let mut types: Vec<_> = self.read().keys().copied().collect();
        types.sort();
        types
    }

    /// Hand client messages to the service of `server_type`
    pub fn route(
        &self,
        server_type: ServerType,
        client: &FrontendClient,
        mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        let service = self.get(server_type).ok_or_else(|| {
            ProtocolError::ServiceError(format!(
                "{}: {server_type}",
                constants::ERR_SERVICE_MISSING
            ))
        })?;
        service.handle_messages(client, mux_id, messages)
    }

    /// Run every registered service until all of them stop.
    ///
    /// A service that fails or panics cancels the rest. Returns the first failure.
    #[instrument(skip(self))]
    pub async fn run_services(&self) -> Result<()> {
        let services: Vec<_> = self.read().values().cloned().collect();
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let mut tasks = JoinSet::new();
        for service in services {
            let server_type = service.server_type();
            let token = self.token.child_token();
            info!(service = %server_type, "Starting service");
            tasks.spawn(async move { (server_type, service.run(token).await) });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((server_type, Ok(()))) => {
                    info!(service = %server_type, "Service stopped");
                    None
                }
                Ok((server_type, Err(e))) => {
                    error!(service = %server_type, error = %e, "Service failed");
                    Some(ProtocolError::ServiceError(format!("{server_type}: {e}")))
                }
                Err(e) => {
                    error!(error = %e, "Service task panicked");
                    Some(ProtocolError::ServiceError(format!("service task aborted: {e}")))
                }
            };

            if let Some(e) = failure {
                if !self.token.is_cancelled() {
                    warn!("Shutting down remaining services");
                    self.token.cancel();
                }
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Ask every service to stop
    pub fn shutdown_services(&self) {
        info!("Shutting down services");
        self.token.cancel();
    }

    /// Time since [`run_services`](Self::run_services) started
    pub fn uptime(&self) -> Duration {
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        started.map(|started| started.elapsed()).unwrap_or_default()
    }

    /// Multi-line status report of the process and every service
    pub fn status(&self) -> String {
        let uptime = self.uptime().as_secs();
        let mut report = format!(
            "Uptime: {:02}:{:02}:{:02}",
            uptime / 3600,
            (uptime / 60) % 60,
            uptime % 60
        );

        let services = self.read();
        let mut types: Vec<_> = services.keys().copied().collect();
        types.sort();
        for server_type in types {
            if let Some(service) = services.get(&server_type) {
                report.push_str(&format!("\n{server_type}: {}", service.status()));
            }
        }
        report
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ServerType, Arc<dyn GameService>>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ServerType, Arc<dyn GameService>>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handshake handler and flags of a gated [`ChannelRouter`]
struct Gate {
    handler: Arc<dyn FrontendHandshake>,
    tracker: HandshakeTracker,
}

/// [`FrontendHandler`] that binds mux channels to registered services.
///
/// Only input that fails validation disconnects a client. Traffic on an unbound
/// channel, for an unregistered service, or rejected by a service for any other reason
/// is logged and counted as a protocol anomaly.
///
/// With a [`FrontendHandshake`] attached, gated channels carry frontend protocol traffic
/// until their handshake finishes, and bound services learn about the client only
/// once every gated channel is done.
pub struct ChannelRouter {
    manager: Weak<ServiceManager>,
    bindings: HashMap<u16, ServerType>,
    gate: Option<Gate>,
    metrics: Option<Arc<Metrics>>,
}

impl ChannelRouter {
    pub fn new(manager: &Arc<ServiceManager>) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            bindings: HashMap::new(),
            gate: None,
            metrics: None,
        }
    }

    /// Game traffic on channel 1, chat on channel 2
    pub fn with_default_bindings(manager: &Arc<ServiceManager>) -> Self {
        Self::new(manager)
            .bind(CHANNEL_GAME, ServerType::GameInstanceServer)
            .bind(CHANNEL_CHAT, ServerType::GroupingManager)
    }

    pub fn bind(mut self, mux_id: u16, server_type: ServerType) -> Self {
        self.bindings.insert(mux_id, server_type);
        self
    }

    /// Require a finished handshake on each of `channels` before routing them.
    /// An empty channel set leaves the router ungated.
    pub fn with_handshake(
        mut self,
        handler: Arc<dyn FrontendHandshake>,
        channels: impl IntoIterator<Item = u16>,
    ) -> Self {
        let tracker = HandshakeTracker::new(channels);
        self.gate = if tracker.required().is_empty() {
            None
        } else {
            Some(Gate { handler, tracker })
        };
        self
    }

    /// Count anomalies into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn binding(&self, mux_id: u16) -> Option<ServerType> {
        self.bindings.get(&mux_id).copied()
    }

    /// Whether `client` finished every required handshake. Always true when ungated.
    pub fn is_admitted(&self, client: &FrontendClient) -> bool {
        self.gate
            .as_ref()
            .map_or(true, |gate| gate.tracker.is_admitted(client.id()))
    }

    fn service_for(&self, mux_id: u16) -> Option<Arc<dyn GameService>> {
        let server_type = self.binding(mux_id)?;
        self.manager.upgrade()?.get(server_type)
    }

    /// Bound services, each once, in a stable order
    fn bound_services(&self, manager: &ServiceManager) -> Vec<Arc<dyn GameService>> {
        let mut types: Vec<ServerType> = self.bindings.values().copied().collect();
        types.sort();
        types.dedup();
        types
            .into_iter()
            .filter_map(|server_type| manager.get(server_type))
            .collect()
    }

    fn admit(&self, client: &FrontendClient) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        info!(client = ?client, "Handshake complete, admitting client");
        for service in self.bound_services(&manager) {
            service.on_client_connected(client);
        }
    }

    fn handshake(
        &self,
        gate: &Gate,
        client: &FrontendClient,
        mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        for mut message in messages {
            message.set_protocol(ProtocolContext::Frontend);
            let id = message.id;
            match gate.handler.handle(client, mux_id, message) {
                Ok(HandshakeStatus::Pending) => {}
                Ok(HandshakeStatus::Finished { mux_id: finished }) => {
                    if gate.tracker.finish(client.id(), finished) {
                        self.admit(client);
                    }
                }
                Err(e) if e.is_validation_failure() => return Err(e),
                Err(e) => {
                    warn!(client = ?client, mux_id, id, error = %e, "Handshake message dropped");
                    self.anomaly();
                }
            }
        }
        Ok(())
    }

    fn anomaly(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.protocol_anomaly();
        }
    }
}

impl FrontendHandler for ChannelRouter {
    fn on_channel_connected(&self, client: &FrontendClient, mux_id: u16) {
        if let Some(gate) = &self.gate {
            debug!(client = ?client, mux_id, gated = gate.tracker.is_gated(mux_id), "Channel awaiting handshake");
            return;
        }
        match self.service_for(mux_id) {
            Some(service) => service.on_client_connected(client),
            None => debug!(client = ?client, mux_id, "No service bound to channel"),
        }
    }

    fn on_messages(
        &self,
        client: &FrontendClient,
        mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()> {
        if let Some(gate) = &self.gate {
            if !gate.tracker.is_finished(client.id(), mux_id) {
                return self.handshake(gate, client, mux_id, messages);
            }
        }

        let Some(server_type) = self.binding(mux_id) else {
            warn!(client = ?client, mux_id, count = messages.len(), "Unhandled messages on channel");
            self.anomaly();
            return Ok(());
        };

        let Some(manager) = self.manager.upgrade() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        let Some(service) = manager.get(server_type) else {
            warn!(
                client = ?client,
                mux_id,
                service = %server_type,
                count = messages.len(),
                "{}",
                constants::ERR_SERVICE_MISSING
            );
            self.anomaly();
            return Ok(());
        };

        match service.handle_messages(client, mux_id, messages) {
            Err(e) if !e.is_validation_failure() => {
                warn!(client = ?client, mux_id, service = %server_type, error = %e, "Messages not handled");
                self.anomaly();
                Ok(())
            }
            result => result,
        }
    }

    fn on_disconnected(&self, client: &FrontendClient) {
        if let Some(gate) = &self.gate {
            gate.tracker.remove(client.id());
        }

        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        for service in self.bound_services(&manager) {
            service.on_client_disconnected(client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Recorder rejects 98 as malformed and 99 as an internal failure
    const MALFORMED_ID: u32 = 98;
    const FAILING_ID: u32 = 99;

    struct Recorder {
        server_type: ServerType,
        handled: AtomicUsize,
        connected: AtomicUsize,
        fail: bool,
    }

    impl Recorder {
        fn new(server_type: ServerType) -> Arc<Self> {
            Arc::new(Self {
                server_type,
                handled: AtomicUsize::new(0),
                connected: AtomicUsize::new(0),
                fail: false,
            })
        }
    }

    impl GameService for Recorder {
        fn server_type(&self) -> ServerType {
            self.server_type
        }

        fn run(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                if self.fail {
                    return Err(ProtocolError::Custom("boom".into()));
                }
                token.cancelled().await;
                Ok(())
            })
        }

        fn handle_messages(
            &self,
            _client: &FrontendClient,
            _mux_id: u16,
            messages: Vec<MessagePackage>,
        ) -> Result<()> {
            for message in &messages {
                match message.id {
                    MALFORMED_ID => return Err(ProtocolError::DecodeFailed("bad".into())),
                    FAILING_ID => return Err(ProtocolError::Custom("busy".into())),
                    _ => {}
                }
            }
            self.handled.fetch_add(messages.len(), Ordering::SeqCst);
            Ok(())
        }

        fn on_client_connected(&self, _client: &FrontendClient) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn status(&self) -> String {
            format!("{} handled", self.handled.load(Ordering::SeqCst))
        }
    }

    fn client() -> FrontendClient {
        FrontendClient::channel(1, "127.0.0.1:1".parse().unwrap()).0
    }

    #[test]
    fn test_register_get_unregister() {
        let manager = ServiceManager::new();
        manager.register(Recorder::new(ServerType::GameInstanceServer)).unwrap();
        assert!(manager
            .register(Recorder::new(ServerType::GameInstanceServer))
            .is_err());
        assert!(manager.get(ServerType::GameInstanceServer).is_some());
        assert_eq!(manager.registered(), vec![ServerType::GameInstanceServer]);

        assert!(manager.unregister(ServerType::GameInstanceServer).is_some());
        assert!(manager.get(ServerType::GameInstanceServer).is_none());
    }

    #[test]
    fn test_route_through_channel_router() {
        let manager = Arc::new(ServiceManager::new());
        let game = Recorder::new(ServerType::GameInstanceServer);
        manager.register(game.clone()).unwrap();

        let router = ChannelRouter::with_default_bindings(&manager);
        let messages = vec![MessagePackage::new(1, vec![1]), MessagePackage::new(2, vec![2])];
        router.on_messages(&client(), CHANNEL_GAME, messages).unwrap();
        assert_eq!(game.handled.load(Ordering::SeqCst), 2);

        router.on_channel_connected(&client(), CHANNEL_GAME);
        assert_eq!(game.connected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unroutable_traffic_is_an_anomaly() {
        let manager = Arc::new(ServiceManager::new());
        let game = Recorder::new(ServerType::GameInstanceServer);
        manager.register(game.clone()).unwrap();
        let metrics = Arc::new(Metrics::new());
        let router =
            ChannelRouter::with_default_bindings(&manager).with_metrics(Arc::clone(&metrics));

        // Chat is bound to a grouping manager that is not registered
        router
            .on_messages(&client(), CHANNEL_CHAT, vec![MessagePackage::new(1, vec![0])])
            .unwrap();
        // Unbound channels
        router
            .on_messages(&client(), 0, vec![MessagePackage::new(1, vec![0])])
            .unwrap();
        router
            .on_messages(&client(), 3, vec![MessagePackage::new(1, vec![0])])
            .unwrap();
        // A service failure that is not the client's fault
        router
            .on_messages(&client(), CHANNEL_GAME, vec![MessagePackage::new(FAILING_ID, Vec::new())])
            .unwrap();

        assert_eq!(metrics.snapshot().protocol_anomalies, 4);
        assert_eq!(game.handled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_input_still_rejected() {
        let manager = Arc::new(ServiceManager::new());
        manager.register(Recorder::new(ServerType::GameInstanceServer)).unwrap();
        let router = ChannelRouter::with_default_bindings(&manager);

        let err = router
            .on_messages(&client(), CHANNEL_GAME, vec![MessagePackage::new(MALFORMED_ID, Vec::new())])
            .unwrap_err();
        assert!(err.is_validation_failure());
    }

    /// Finishes channel `payload[0]` on message id 1, rejects id 2 as malformed
    #[derive(Default)]
    struct Handshakes {
        seen: Mutex<Vec<(u16, u32, Option<ProtocolContext>)>>,
    }

    impl FrontendHandshake for Handshakes {
        fn handle(
            &self,
            _client: &FrontendClient,
            mux_id: u16,
            message: MessagePackage,
        ) -> Result<HandshakeStatus> {
            self.seen
                .lock()
                .unwrap()
                .push((mux_id, message.id, message.protocol()));
            match message.id {
                1 => Ok(HandshakeStatus::Finished {
                    mux_id: u16::from(message.payload[0]),
                }),
                2 => Err(ProtocolError::DecodeFailed("bad credentials".into())),
                _ => Ok(HandshakeStatus::Pending),
            }
        }
    }

    fn gated_router() -> (Arc<ServiceManager>, Arc<Recorder>, Arc<Handshakes>, ChannelRouter) {
        let manager = Arc::new(ServiceManager::new());
        let game = Recorder::new(ServerType::GameInstanceServer);
        manager.register(game.clone()).unwrap();
        let handshakes = Arc::new(Handshakes::default());
        let router = ChannelRouter::with_default_bindings(&manager)
            .with_handshake(handshakes.clone(), [CHANNEL_GAME, CHANNEL_CHAT]);
        (manager, game, handshakes, router)
    }

    #[test]
    fn test_admission_waits_for_every_handshake() {
        let (_manager, game, handshakes, router) = gated_router();
        let client = client();

        router.on_channel_connected(&client, CHANNEL_GAME);
        router.on_channel_connected(&client, CHANNEL_CHAT);
        assert_eq!(game.connected.load(Ordering::SeqCst), 0);

        // Before its handshake, game channel traffic is frontend protocol
        router
            .on_messages(&client, CHANNEL_GAME, vec![MessagePackage::new(7, Vec::new())])
            .unwrap();
        router
            .on_messages(&client, CHANNEL_GAME, vec![MessagePackage::new(1, vec![1])])
            .unwrap();
        assert_eq!(game.handled.load(Ordering::SeqCst), 0);
        assert_eq!(game.connected.load(Ordering::SeqCst), 0);
        assert!(!router.is_admitted(&client));

        router
            .on_messages(&client, CHANNEL_CHAT, vec![MessagePackage::new(1, vec![2])])
            .unwrap();
        assert_eq!(game.connected.load(Ordering::SeqCst), 1);
        assert!(router.is_admitted(&client));

        // Finished channels route to their service
        router
            .on_messages(&client, CHANNEL_GAME, vec![MessagePackage::new(7, Vec::new())])
            .unwrap();
        assert_eq!(game.handled.load(Ordering::SeqCst), 1);

        let seen = handshakes.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen
            .iter()
            .all(|(_, _, protocol)| *protocol == Some(ProtocolContext::Frontend)));
    }

    #[test]
    fn test_malformed_handshake_disconnects() {
        let (_manager, game, _handshakes, router) = gated_router();
        let client = client();

        let err = router
            .on_messages(&client, CHANNEL_GAME, vec![MessagePackage::new(2, Vec::new())])
            .unwrap_err();
        assert!(err.is_validation_failure());
        assert_eq!(game.connected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_forgets_handshake() {
        let (_manager, _game, _handshakes, router) = gated_router();
        let client = client();
        router
            .on_messages(&client, CHANNEL_GAME, vec![MessagePackage::new(1, vec![1])])
            .unwrap();
        router
            .on_messages(&client, CHANNEL_CHAT, vec![MessagePackage::new(1, vec![2])])
            .unwrap();
        assert!(router.is_admitted(&client));

        router.on_disconnected(&client);
        assert!(!router.is_admitted(&client));
    }

    #[test]
    fn test_status_lists_services() {
        let manager = ServiceManager::new();
        manager.register(Recorder::new(ServerType::GameInstanceServer)).unwrap();
        let status = manager.status();
        assert!(status.starts_with("Uptime: 00:00:00"));
        assert!(status.contains("GameInstanceServer: 0 handled"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_services() {
        let manager = Arc::new(ServiceManager::new());
        manager.register(Recorder::new(ServerType::GameInstanceServer)).unwrap();
        manager.register(Recorder::new(ServerType::GroupingManager)).unwrap();

        let runner = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run_services().await })
        };
        tokio::task::yield_now().await;
        manager.shutdown_services();

        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failure_cancels_other_services() {
        let manager = ServiceManager::new();
        manager.register(Recorder::new(ServerType::GameInstanceServer)).unwrap();
        manager
            .register(Arc::new(Recorder {
                server_type: ServerType::Billing,
                handled: AtomicUsize::new(0),
                connected: AtomicUsize::new(0),
                fail: true,
            }))
            .unwrap();

        let result = manager.run_services().await;
        assert!(matches!(result, Err(ProtocolError::ServiceError(_))));
        assert!(manager.token().is_cancelled());
    }
}
