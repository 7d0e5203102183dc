//! # Mux Channel State
//!
//! Per-connection channel state machine. Each channel moves
//! `Closed -> Connecting -> Open`; there is no closing state because `Disconnect` tears
//! down the whole connection at once.
//!
//! Out-of-range channel ids are a protocol anomaly, not a rejection: they are logged and
//! the command is processed anyway.

use crate::core::packet::{MuxCommand, MuxPacket};
use crate::error::ProtocolError;
use crate::protocol::message::MessagePackage;
use crate::utils::metrics::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Session and world management traffic
pub const CHANNEL_GAME: u16 = 1;

/// Chat and social traffic
pub const CHANNEL_CHAT: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    Connecting,
    Open,
}

/// What the connection should do in response to an inbound packet
#[derive(Debug)]
pub enum MuxEvent {
    /// The peer opened a channel; send `reply` back
    Accepted { mux_id: u16, reply: MuxPacket },
    /// A channel we connected was acknowledged
    Opened { mux_id: u16 },
    /// Forward these messages to the service bound to `mux_id`
    Route {
        mux_id: u16,
        messages: Vec<MessagePackage>,
    },
    /// The peer ended the connection
    Disconnect,
    /// Nothing to do
    Ignore,
}

/// Channel states of one connection
#[derive(Debug)]
pub struct MuxSession {
    channel_count: u16,
    channels: HashMap<u16, ChannelState>,
    anomalies: u64,
    metrics: Option<Arc<Metrics>>,
}

impl MuxSession {
    /// `channel_count` is the highest valid channel id; channel 0 is never valid
    pub fn new(channel_count: u16) -> Self {
        Self {
            channel_count,
            channels: HashMap::new(),
            anomalies: 0,
            metrics: None,
        }
    }

    /// Record anomalies into `metrics` as well as the local counter
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[inline]
    pub fn is_valid_channel(&self, mux_id: u16) -> bool {
        mux_id != 0 && mux_id <= self.channel_count
    }

    pub fn state(&self, mux_id: u16) -> ChannelState {
        self.channels.get(&mux_id).copied().unwrap_or_default()
    }

    /// Number of protocol anomalies seen on this connection
    pub fn anomaly_count(&self) -> u64 {
        self.anomalies
    }

    /// Open a channel from our side. The returned packet must be sent to the peer.
    pub fn connect(&mut self, mux_id: u16) -> MuxPacket {
        self.channels.insert(mux_id, ChannelState::Connecting);
        MuxPacket::control(mux_id, MuxCommand::Connect)
    }

    /// Close every channel from our side. The returned packet must be sent to the peer.
    pub fn disconnect(&mut self, mux_id: u16) -> MuxPacket {
        self.channels.clear();
        MuxPacket::control(mux_id, MuxCommand::Disconnect)
    }

    /// Apply an inbound packet to the channel state
    pub fn handle(&mut self, packet: MuxPacket) -> MuxEvent {
        let mux_id = packet.mux_id();
        let command = packet.command();

        if !self.is_valid_channel(mux_id) {
            self.anomaly(ProtocolError::InvalidChannel(mux_id));
        }

        match command {
            MuxCommand::Connect => {
                debug!(mux_id, "Channel connect");
                self.channels.insert(mux_id, ChannelState::Open);
                MuxEvent::Accepted {
                    mux_id,
                    reply: MuxPacket::control(mux_id, MuxCommand::ConnectAck),
                }
            }

            MuxCommand::ConnectAck => {
                if self.state(mux_id) == ChannelState::Connecting {
                    self.channels.insert(mux_id, ChannelState::Open);
                    MuxEvent::Opened { mux_id }
                } else {
                    self.anomaly(ProtocolError::UnexpectedMuxCommand { mux_id, command });
                    MuxEvent::Ignore
                }
            }

            MuxCommand::Disconnect => {
                debug!(mux_id, "Peer requested disconnect");
                self.channels.clear();
                MuxEvent::Disconnect
            }

            MuxCommand::ConnectWithData => {
                self.anomaly(ProtocolError::UnexpectedMuxCommand { mux_id, command });
                MuxEvent::Ignore
            }

            MuxCommand::Data => {
                if self.state(mux_id) != ChannelState::Open {
                    self.anomaly(ProtocolError::UnexpectedMuxCommand { mux_id, command });
                }
                MuxEvent::Route {
                    mux_id,
                    messages: packet.into_messages(),
                }
            }
        }
    }

    fn anomaly(&mut self, error: ProtocolError) {
        warn!(error = %error, "Mux protocol anomaly");
        self.anomalies += 1;
        if let Some(metrics) = &self.metrics {
            metrics.protocol_anomaly();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_opens_and_acks() {
        let mut session = MuxSession::new(2);
        match session.handle(MuxPacket::control(CHANNEL_GAME, MuxCommand::Connect)) {
            MuxEvent::Accepted { mux_id, reply } => {
                assert_eq!(mux_id, CHANNEL_GAME);
                assert_eq!(reply.command(), MuxCommand::ConnectAck);
                assert_eq!(reply.mux_id(), CHANNEL_GAME);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.state(CHANNEL_GAME), ChannelState::Open);
        assert_eq!(session.anomaly_count(), 0);
    }

    #[test]
    fn test_unsolicited_ack_is_anomaly() {
        let mut session = MuxSession::new(2);
        let event = session.handle(MuxPacket::control(1, MuxCommand::ConnectAck));
        assert!(matches!(event, MuxEvent::Ignore));
        assert_eq!(session.state(1), ChannelState::Closed);
        assert_eq!(session.anomaly_count(), 1);
    }

    #[test]
    fn test_ack_after_connect() {
        let mut session = MuxSession::new(2);
        let packet = session.connect(CHANNEL_CHAT);
        assert_eq!(packet.command(), MuxCommand::Connect);
        assert_eq!(session.state(CHANNEL_CHAT), ChannelState::Connecting);

        let event = session.handle(MuxPacket::control(CHANNEL_CHAT, MuxCommand::ConnectAck));
        assert!(matches!(event, MuxEvent::Opened { mux_id: CHANNEL_CHAT }));
        assert_eq!(session.state(CHANNEL_CHAT), ChannelState::Open);
    }

    #[test]
    fn test_disconnect_closes_everything() {
        let mut session = MuxSession::new(2);
        session.handle(MuxPacket::control(1, MuxCommand::Connect));
        session.handle(MuxPacket::control(2, MuxCommand::Connect));

        let event = session.handle(MuxPacket::control(2, MuxCommand::Disconnect));
        assert!(matches!(event, MuxEvent::Disconnect));
        assert_eq!(session.state(1), ChannelState::Closed);
        assert_eq!(session.state(2), ChannelState::Closed);
    }

    #[test]
    fn test_connect_with_data_ignored() {
        let mut session = MuxSession::new(2);
        let event = session.handle(MuxPacket::control(1, MuxCommand::ConnectWithData));
        assert!(matches!(event, MuxEvent::Ignore));
        assert_eq!(session.anomaly_count(), 1);
    }

    #[test]
    fn test_data_routed_even_when_closed() {
        let mut session = MuxSession::new(2);
        let packet = MuxPacket::data(1, vec![MessagePackage::new(3, vec![1])]);
        match session.handle(packet) {
            MuxEvent::Route { mux_id, messages } => {
                assert_eq!(mux_id, 1);
                assert_eq!(messages.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.anomaly_count(), 1);
    }

    #[test]
    fn test_out_of_range_channel_still_processed() {
        let metrics = Arc::new(Metrics::new());
        let mut session = MuxSession::new(2).with_metrics(metrics.clone());

        for mux_id in [0, 3] {
            let event = session.handle(MuxPacket::control(mux_id, MuxCommand::Connect));
            assert!(matches!(event, MuxEvent::Accepted { .. }));
            assert_eq!(session.state(mux_id), ChannelState::Open);
        }
        assert_eq!(session.anomaly_count(), 2);
        assert_eq!(metrics.snapshot().protocol_anomalies, 2);
    }
}
