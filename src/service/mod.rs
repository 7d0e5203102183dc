//! # Game Services
//!
//! Everything between decoded client traffic and the game tick.
//!
//! ## Components
//! - **Mailbox**: multi-producer queue from I/O tasks into the tick thread
//! - **Registry**: session map with double-buffered admission and eviction
//! - **Connection**: per-session outbound batching
//! - **Game**: the tick loop and its cross-thread handle
//! - **Commands**: static chat command table
//! - **Handshake**: frontend handshake gating of client channels
//! - **Manager**: service lifecycle and channel routing

pub mod commands;
pub mod connection;
pub mod game;
pub mod handshake;
pub mod mailbox;
pub mod manager;
pub mod registry;

pub use commands::CommandRegistry;
pub use connection::OutboundQueue;
pub use game::{Game, GameHandle, GameInstanceService};
pub use handshake::{FrontendHandshake, HandshakeStatus, HandshakeTracker};
pub use mailbox::{CoreNetworkMailbox, MailboxMessage, MessageList};
pub use manager::{ChannelRouter, GameService, ServerType, ServiceManager};
pub use registry::{AdmissionQueues, ConnectionRegistry, Session};
