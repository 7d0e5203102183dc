//! # Frontend Server
//!
//! TCP accept loop for game clients. Every connection is framed with [`MuxCodec`],
//! driven through a [`MuxSession`], and handed to a [`FrontendHandler`] as
//! channel-tagged message batches.
//!
//! Each connection task owns its socket. Other threads reach it through a cloned
//! [`FrontendClient`], which feeds an unbounded channel drained by the task's writer
//! half, so the game tick never blocks on the network.

use crate::config::NetworkConfig;
use crate::core::codec::MuxCodec;
use crate::core::packet::MuxPacket;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{EncodeContext, MessagePackage};
use crate::protocol::mux::{MuxEvent, MuxSession};
use crate::service::manager::{GameService, ServerType};
use crate::utils::metrics::Metrics;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Commands queued for a connection's writer
#[derive(Debug)]
pub enum Outbound {
    Packet(MuxPacket),
    Disconnect,
}

/// Handle to one client connection. Cheap to clone and usable from any thread.
///
/// Equality and hashing use the connection id only.
#[derive(Clone)]
pub struct FrontendClient {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrontendClient {
    /// Create a client handle and the receiver its connection task drains
    pub fn channel(id: u64, peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, peer, tx }, rx)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a packet for sending
    pub fn send(&self, packet: MuxPacket) -> Result<()> {
        self.tx
            .send(Outbound::Packet(packet))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Queue a `Data` packet carrying `messages` on `mux_id`
    pub fn send_messages(&self, mux_id: u16, messages: Vec<MessagePackage>) -> Result<()> {
        self.send(MuxPacket::data(mux_id, messages))
    }

    /// Close the connection without telling the peer why
    pub fn disconnect(&self) {
        let _ = self.tx.send(Outbound::Disconnect);
    }
}

impl PartialEq for FrontendClient {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FrontendClient {}

impl Hash for FrontendClient {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FrontendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrontendClient({}, {})", self.id, self.peer)
    }
}

/// Application hooks for connection events
pub trait FrontendHandler: Send + Sync + 'static {
    fn on_connected(&self, _client: &FrontendClient) {}

    /// The client opened `mux_id`
    fn on_channel_connected(&self, _client: &FrontendClient, _mux_id: u16) {}

    /// A `Data` packet arrived on `mux_id`. An error disconnects the client silently.
    fn on_messages(
        &self,
        client: &FrontendClient,
        mux_id: u16,
        messages: Vec<MessagePackage>,
    ) -> Result<()>;

    fn on_disconnected(&self, _client: &FrontendClient) {}
}

/// Accepts client connections and runs one task per connection
pub struct FrontendServer<H> {
    config: NetworkConfig,
    handler: Arc<H>,
    ctx: EncodeContext,
    metrics: Arc<Metrics>,
    next_client_id: AtomicU64,
    active_connections: Arc<AtomicUsize>,
}

impl<H: FrontendHandler> FrontendServer<H> {
    pub fn new(
        config: NetworkConfig,
        handler: Arc<H>,
        ctx: EncodeContext,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            handler,
            ctx,
            metrics,
            next_client_id: AtomicU64::new(1),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        info!(address = %self.config.server.address, "Frontend listening");
        Ok(listener)
    }

    /// Bind and serve until `token` is cancelled
    pub async fn listen_and_serve(&self, token: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, token).await
    }

    /// Serve connections from an already bound listener until `token` is cancelled
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Shutting down frontend. Waiting for connections to close...");
                    self.wait_for_connections().await;
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, token.child_token()),
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, token: CancellationToken) {
        let active = self.active_connections.fetch_add(1, Ordering::AcqRel);
        if active >= self.config.server.max_connections {
            self.active_connections.fetch_sub(1, Ordering::AcqRel);
            warn!(peer = %peer, limit = self.config.server.max_connections, "Connection limit reached, rejecting");
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection {
            handler: Arc::clone(&self.handler),
            ctx: self.ctx.clone(),
            metrics: Arc::clone(&self.metrics),
            channel_count: self.config.mux.channel_count,
            max_body_size: self.config.mux.max_body_size,
        };
        let active_connections = Arc::clone(&self.active_connections);

        self.metrics.connection_established();
        info!(peer = %peer, client_id = id, "New connection established");

        tokio::spawn(async move {
            connection.run(stream, id, peer, token).await;
            active_connections.fetch_sub(1, Ordering::AcqRel);
            connection.metrics.connection_closed();
            info!(peer = %peer, client_id = id, "Connection closed");
        });
    }

    async fn wait_for_connections(&self) {
        let timeout = tokio::time::sleep(self.config.server.shutdown_timeout);
        tokio::pin!(timeout);

        loop {
            let connections = self.active_connections();
            if connections == 0 {
                info!("All connections closed");
                return;
            }

            tokio::select! {
                _ = &mut timeout => {
                    warn!(connections, "Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }
    }
}

impl<H: FrontendHandler> GameService for FrontendServer<H> {
    fn server_type(&self) -> ServerType {
        ServerType::FrontendServer
    }

    fn run(self: Arc<Self>, token: CancellationToken) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { self.listen_and_serve(token).await })
    }

    fn status(&self) -> String {
        format!("Frontend: {} connections", self.active_connections())
    }
}

struct Connection<H> {
    handler: Arc<H>,
    ctx: EncodeContext,
    metrics: Arc<Metrics>,
    channel_count: u16,
    max_body_size: usize,
}

impl<H: FrontendHandler> Connection<H> {
    async fn run(&self, stream: TcpStream, id: u64, peer: SocketAddr, token: CancellationToken) {
        let (client, mut outbound) = FrontendClient::channel(id, peer);
        let codec = MuxCodec::new(self.ctx.clone())
            .with_max_body_size(self.max_body_size)
            .with_metrics(Arc::clone(&self.metrics));
        let (mut sink, mut inbound) = Framed::new(stream, codec).split();
        let mut session = MuxSession::new(self.channel_count).with_metrics(Arc::clone(&self.metrics));

        self.handler.on_connected(&client);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(client = ?client, "Connection cancelled");
                    break;
                }

                command = outbound.recv() => {
                    let Some(Outbound::Packet(packet)) = command else {
                        debug!(client = ?client, "Disconnect requested");
                        break;
                    };

                    let message_count = packet.messages().len() as u64;
                    if let Err(e) = sink.send(packet).await {
                        debug!(client = ?client, error = %e, "Write failed");
                        break;
                    }
                    self.metrics.packet_sent(message_count);
                }

                frame = inbound.next() => {
                    let packet = match frame {
                        Some(Ok(packet)) => packet,
                        Some(Err(e)) => {
                            if e.is_validation_failure() {
                                self.metrics.validation_failure();
                            }
                            debug!(client = ?client, error = %e, "Dropping connection on read error");
                            break;
                        }
                        None => break,
                    };

                    self.metrics.packet_received(packet.messages().len() as u64);

                    match session.handle(packet) {
                        MuxEvent::Accepted { mux_id, reply } => {
                            if let Err(e) = sink.send(reply).await {
                                debug!(client = ?client, error = %e, "Write failed");
                                break;
                            }
                            self.handler.on_channel_connected(&client, mux_id);
                        }
                        MuxEvent::Opened { mux_id } => {
                            self.handler.on_channel_connected(&client, mux_id);
                        }
                        MuxEvent::Route { mux_id, mut messages } => {
                            for message in &mut messages {
                                message.set_received_times(self.ctx.clock().as_ref());
                            }
                            if let Err(e) = self.handler.on_messages(&client, mux_id, messages) {
                                if e.is_validation_failure() {
                                    self.metrics.validation_failure();
                                }
                                debug!(client = ?client, mux_id, error = %e, "Rejected client messages");
                                break;
                            }
                        }
                        MuxEvent::Disconnect => break,
                        MuxEvent::Ignore => {}
                    }
                }
            }
        }

        // Stop accepting outbound traffic before the handler forgets the client
        outbound.close();
        self.handler.on_disconnected(&client);
    }
}
