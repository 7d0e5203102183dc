//! # mmo-netcore
//!
//! Channel-multiplexed TCP transport for MMO game servers.
//!
//! A client connection carries several logical channels. Each mux packet holds a batch
//! of `(id, payload)` envelopes; server-to-client payloads are prefixed with the game
//! time for latency compensation. Inbound messages are decoded on the I/O side, queued
//! in a mailbox and consumed once per tick by a single-threaded game loop that owns all
//! session state. Entity state is replicated as bit-packed property collections.
//!
//! ## Layout
//! - [`core`]: varints, envelopes, mux packets and the stream codec
//! - [`protocol`]: message packages, dispatch and the channel state machine
//! - [`properties`]: property ids, values and replicated collections
//! - [`service`]: mailbox, connection registry, game loop and service manager
//! - [`transport`]: the frontend TCP server
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and metrics

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod properties;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use crate::core::codec::MuxCodec;
pub use crate::core::envelope::Envelope;
pub use crate::core::packet::{MuxCommand, MuxPacket};
pub use error::{ProtocolError, Result};
pub use properties::{PropertyCollection, PropertyId, PropertyValue};
pub use protocol::dispatcher::{DispatchTable, ProtocolDispatch, WireMessage};
pub use protocol::message::{EncodeContext, MessagePackage, ProtocolContext};
