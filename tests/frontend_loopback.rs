//! End-to-end tests over a real TCP socket
//!
//! A client connects to the frontend, opens the game channel and exchanges `Data`
//! packets with a game instance hosted by the service manager, optionally behind the
//! frontend handshake.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use futures::{SinkExt, StreamExt};
use mmo_netcore::config::{GameConfig, NetworkConfig};
use mmo_netcore::core::codec::MuxCodec;
use mmo_netcore::core::packet::{MuxCommand, MuxPacket};
use mmo_netcore::error::{ProtocolError, Result};
use mmo_netcore::protocol::dispatcher::{DispatchTable, WireMessage};
use mmo_netcore::protocol::message::{EncodeContext, MessagePackage, ProtocolContext};
use mmo_netcore::protocol::mux::{CHANNEL_CHAT, CHANNEL_GAME};
use mmo_netcore::service::connection::OutboundQueue;
use mmo_netcore::service::game::{Game, GameInstanceService};
use mmo_netcore::service::handshake::{FrontendHandshake, HandshakeStatus};
use mmo_netcore::service::mailbox::MailboxMessage;
use mmo_netcore::service::manager::{ChannelRouter, GameService, ServerType, ServiceManager};
use mmo_netcore::service::registry::Session;
use mmo_netcore::transport::frontend::{FrontendClient, FrontendServer};
use mmo_netcore::utils::metrics::Metrics;
use mmo_netcore::utils::time::ManualClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const CHAT_ID: u32 = 4;
const ACK_ID: u32 = 5;
const ECHO_ID: u32 = 6;
const HANDSHAKE_ID: u32 = 1;
const HANDSHAKE_REPLY_ID: u32 = 2;
const FRONTEND_REPLY_ID: u32 = 3;
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Chat(String);

impl WireMessage for Chat {
    fn protocol_id(&self) -> (ProtocolContext, u32) {
        (ProtocolContext::ClientToGameServer, CHAT_ID)
    }

    fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(self.0.as_bytes().to_vec())
    }
}

fn table() -> DispatchTable<Chat> {
    DispatchTable::new()
        .with(ProtocolContext::ClientToGameServer, CHAT_ID, |payload| {
            String::from_utf8(payload.to_vec())
                .map(Chat)
                .map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
        })
        .unwrap()
}

/// Answers every chat line with an ack and an echo, both in the same tick
struct EchoSession {
    outbound: OutboundQueue,
}

impl Session for EchoSession {
    type Message = Chat;

    fn enter_game(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive_message(&mut self, message: MailboxMessage<Chat>) {
        let reply = |id: u32, payload: Vec<u8>| {
            MessagePackage::new(id, payload).with_protocol(ProtocolContext::GameServerToClient)
        };
        self.outbound.post(reply(ACK_ID, Vec::new()));
        self.outbound.post(reply(ECHO_ID, message.message.0.into_bytes()));
    }

    fn flush(&mut self) -> Result<()> {
        self.outbound.flush()
    }
}

/// Frontend protocol: `HANDSHAKE_ID` with the finished channel as its only payload
/// byte completes that channel; anything else is answered and left pending
struct LoopbackHandshake;

impl FrontendHandshake for LoopbackHandshake {
    fn handle(
        &self,
        client: &FrontendClient,
        mux_id: u16,
        message: MessagePackage,
    ) -> Result<HandshakeStatus> {
        assert_eq!(message.protocol(), Some(ProtocolContext::Frontend));

        if message.id != HANDSHAKE_ID {
            let reply = MessagePackage::new(FRONTEND_REPLY_ID, Vec::new())
                .with_protocol(ProtocolContext::Frontend);
            client.send_messages(mux_id, vec![reply])?;
            return Ok(HandshakeStatus::Pending);
        }

        let finished = message
            .payload
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::DecodeFailed("empty handshake".into()))?;
        let reply = MessagePackage::new(HANDSHAKE_REPLY_ID, Vec::new())
            .with_protocol(ProtocolContext::Frontend);
        client.send_messages(mux_id, vec![reply])?;
        Ok(HandshakeStatus::Finished {
            mux_id: u16::from(finished),
        })
    }
}

struct Harness {
    addr: std::net::SocketAddr,
    manager: Arc<ServiceManager>,
    metrics: Arc<Metrics>,
    frontend_token: CancellationToken,
    frontend: JoinHandle<Result<()>>,
    services: JoinHandle<Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|router| router).await
    }

    async fn start_with(configure: impl FnOnce(ChannelRouter) -> ChannelRouter) -> Self {
        let metrics = Arc::new(Metrics::new());
        let clock = Arc::new(ManualClock::new(Duration::from_micros(150)));
        let manager = Arc::new(ServiceManager::new());

        let game = Game::new(
            Arc::new(table()),
            |client: &FrontendClient| EchoSession {
                outbound: OutboundQueue::new(client.clone()),
            },
            &GameConfig::default(),
            clock.clone(),
            Arc::clone(&metrics),
        );
        let service = GameInstanceService::new(game, Duration::from_millis(5));
        manager.register(Arc::new(service)).unwrap();

        let router = Arc::new(configure(
            ChannelRouter::with_default_bindings(&manager).with_metrics(Arc::clone(&metrics)),
        ));
        let ctx = EncodeContext::new(clock, Vec::<u32>::new());
        let frontend = Arc::new(FrontendServer::new(
            NetworkConfig::default(),
            router,
            ctx,
            Arc::clone(&metrics),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frontend_token = CancellationToken::new();

        let serve_token = frontend_token.clone();
        let frontend = tokio::spawn(async move { frontend.serve(listener, serve_token).await });
        let run_manager = Arc::clone(&manager);
        let services = tokio::spawn(async move { run_manager.run_services().await });

        Self {
            addr,
            manager,
            metrics,
            frontend_token,
            frontend,
            services,
        }
    }

    async fn connect(&self) -> Framed<TcpStream, MuxCodec> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        Framed::new(stream, MuxCodec::default())
    }

    async fn shutdown(self) {
        self.frontend_token.cancel();
        self.manager.shutdown_services();
        self.frontend.await.unwrap().unwrap();
        self.services.await.unwrap().unwrap();
    }
}

async fn next_packet(client: &mut Framed<TcpStream, MuxCodec>) -> MuxPacket {
    tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("timed out waiting for a packet")
        .expect("connection closed")
        .expect("decode failed")
}

async fn open_channel(client: &mut Framed<TcpStream, MuxCodec>, mux_id: u16) {
    client
        .send(MuxPacket::control(mux_id, MuxCommand::Connect))
        .await
        .unwrap();
    let ack = next_packet(client).await;
    assert_eq!(ack.command(), MuxCommand::ConnectAck);
    assert_eq!(ack.mux_id(), mux_id);
}

/// Send one `Data` packet and return the ids of the single reply packet
async fn exchange(
    client: &mut Framed<TcpStream, MuxCodec>,
    mux_id: u16,
    message: MessagePackage,
) -> Vec<u32> {
    client.send(MuxPacket::data(mux_id, vec![message])).await.unwrap();
    let reply = next_packet(client).await;
    assert_eq!(reply.mux_id(), mux_id);
    reply.messages().iter().map(|m| m.id).collect()
}

/// `(sessions, frame)` parsed from the game service status line
fn game_status(manager: &ServiceManager) -> (usize, u64) {
    let status = manager.get(ServerType::GameInstanceServer).unwrap().status();
    let (sessions, frame) = status.split_once(" sessions, frame ").unwrap();
    (sessions.parse().unwrap(), frame.parse().unwrap())
}

async fn wait_for_sessions(manager: &ServiceManager, expected: usize) {
    let service = manager.get(ServerType::GameInstanceServer).unwrap();
    let wanted = format!("{expected} sessions");
    tokio::time::timeout(TIMEOUT, async {
        while !service.status().starts_with(&wanted) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session count never reached");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_game_channel_round_trip() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    client
        .send(MuxPacket::control(CHANNEL_GAME, MuxCommand::Connect))
        .await
        .unwrap();
    let ack = next_packet(&mut client).await;
    assert_eq!(ack.command(), MuxCommand::ConnectAck);
    assert_eq!(ack.mux_id(), CHANNEL_GAME);

    let line = MessagePackage::new(CHAT_ID, b"hello".to_vec());
    client
        .send(MuxPacket::data(CHANNEL_GAME, vec![line]))
        .await
        .unwrap();

    // Both replies leave in one batched packet
    let reply = next_packet(&mut client).await;
    assert_eq!(reply.command(), MuxCommand::Data);
    assert_eq!(reply.mux_id(), CHANNEL_GAME);
    let ids: Vec<u32> = reply.messages().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![ACK_ID, ECHO_ID]);

    // Server-to-client payloads carry the game time ahead of the body
    let (stamp, body) = reply.messages()[1].split_timestamp().unwrap();
    assert_eq!(stamp, 150);
    assert_eq!(&body[..], b"hello");

    wait_for_sessions(&harness.manager, 1).await;
    drop(client);
    wait_for_sessions(&harness.manager, 0).await;

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.connections_total, 1);
    assert!(snapshot.sessions_admitted >= 1);
    assert!(snapshot.ticks > 0);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_input_disconnects_silently() {
    let harness = Harness::start().await;
    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let mut raw = Framed::new(stream, tokio_util::codec::BytesCodec::new());

    // Unknown mux command 0x7F
    raw.send(bytes::Bytes::from_static(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x7F]))
        .await
        .unwrap();

    let next = tokio::time::timeout(TIMEOUT, raw.next())
        .await
        .expect("server never closed the connection");
    match next {
        None | Some(Err(_)) => {}
        Some(Ok(bytes)) => panic!("server answered malformed input with {bytes:?}"),
    }
    assert_eq!(harness.metrics.snapshot().validation_failures, 1);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_message_disconnects() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;

    client
        .send(MuxPacket::control(CHANNEL_GAME, MuxCommand::Connect))
        .await
        .unwrap();
    next_packet(&mut client).await;

    // Not valid UTF-8, so the chat parser rejects it
    let bad = MessagePackage::new(CHAT_ID, vec![0xC3, 0x28]);
    client
        .send(MuxPacket::data(CHANNEL_GAME, vec![bad]))
        .await
        .unwrap();

    let next = tokio::time::timeout(TIMEOUT, client.next())
        .await
        .expect("server never closed the connection");
    assert!(next.is_none() || matches!(next, Some(Err(_))));

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unroutable_data_keeps_connection() {
    let harness = Harness::start().await;
    let mut client = harness.connect().await;
    open_channel(&mut client, CHANNEL_GAME).await;

    // No grouping service is registered for chat; 0 and 3 are not channels at all
    for mux_id in [CHANNEL_CHAT, 0, 3] {
        let line = MessagePackage::new(CHAT_ID, b"lost".to_vec());
        client.send(MuxPacket::data(mux_id, vec![line])).await.unwrap();
    }

    // The same socket still completes a game round trip
    let ids = exchange(&mut client, CHANNEL_GAME, MessagePackage::new(CHAT_ID, b"hi".to_vec())).await;
    assert_eq!(ids, vec![ACK_ID, ECHO_ID]);

    let snapshot = harness.metrics.snapshot();
    assert!(snapshot.protocol_anomalies >= 3);
    assert_eq!(snapshot.validation_failures, 0);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_gates_admission() {
    let harness = Harness::start_with(|router| {
        router.with_handshake(Arc::new(LoopbackHandshake), [CHANNEL_GAME, CHANNEL_CHAT])
    })
    .await;
    let mut client = harness.connect().await;
    open_channel(&mut client, CHANNEL_GAME).await;
    open_channel(&mut client, CHANNEL_CHAT).await;

    // Game channel traffic goes to the frontend protocol until its handshake is done
    let ids = exchange(&mut client, CHANNEL_GAME, MessagePackage::new(CHAT_ID, b"early".to_vec())).await;
    assert_eq!(ids, vec![FRONTEND_REPLY_ID]);

    let ids = exchange(&mut client, CHANNEL_GAME, MessagePackage::new(HANDSHAKE_ID, vec![1])).await;
    assert_eq!(ids, vec![HANDSHAKE_REPLY_ID]);

    // One handshake is not enough to enter the game
    let (_, start_frame) = game_status(&harness.manager);
    tokio::time::timeout(TIMEOUT, async {
        while game_status(&harness.manager).1 < start_frame + 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("game loop stalled");
    assert_eq!(game_status(&harness.manager).0, 0);

    let ids = exchange(&mut client, CHANNEL_CHAT, MessagePackage::new(HANDSHAKE_ID, vec![2])).await;
    assert_eq!(ids, vec![HANDSHAKE_REPLY_ID]);
    wait_for_sessions(&harness.manager, 1).await;

    let ids = exchange(&mut client, CHANNEL_GAME, MessagePackage::new(CHAT_ID, b"hello".to_vec())).await;
    assert_eq!(ids, vec![ACK_ID, ECHO_ID]);

    drop(client);
    wait_for_sessions(&harness.manager, 0).await;
    harness.shutdown().await;
}
