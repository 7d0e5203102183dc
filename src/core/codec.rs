//! # Mux Codec
//!
//! `tokio_util` codec that frames [`MuxPacket`]s on a byte stream. Use it with
//! `Framed<TcpStream, MuxCodec>` to get a `Stream` of inbound packets and a `Sink` for
//! outbound ones.

use crate::core::packet::{MuxPacket, MAX_MUX_BODY_SIZE};
use crate::error::ProtocolError;
use crate::protocol::message::EncodeContext;
use crate::utils::metrics::Metrics;
use bytes::BytesMut;
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};

/// Stream framing for mux packets.
///
/// Outbound messages are encoded with the codec's [`EncodeContext`], which supplies the
/// game clock for latency timestamps. With [`Metrics`] attached, byte counters are
/// fed from the buffer growth and consumption the codec itself sees.
#[derive(Clone)]
pub struct MuxCodec {
    ctx: EncodeContext,
    max_body_size: usize,
    metrics: Option<Arc<Metrics>>,
}

impl MuxCodec {
    pub fn new(ctx: EncodeContext) -> Self {
        Self {
            ctx,
            max_body_size: MAX_MUX_BODY_SIZE,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Lower the largest body accepted from the peer. Values above the header limit are
    /// clamped to it.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size.min(MAX_MUX_BODY_SIZE);
        self
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl Default for MuxCodec {
    fn default() -> Self {
        Self::new(EncodeContext::default())
    }
}

impl Decoder for MuxCodec {
    type Item = MuxPacket;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let before = src.len();
        let packet = MuxPacket::decode_frame(src, self.max_body_size)?;
        if let (Some(metrics), Some(_)) = (&self.metrics, &packet) {
            metrics.bytes_received(before.saturating_sub(src.len()) as u64);
        }
        Ok(packet)
    }
}

impl Encoder<MuxPacket> for MuxCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: MuxPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let before = dst.len();
        item.encode(dst, &self.ctx)?;
        if let Some(metrics) = &self.metrics {
            metrics.bytes_sent((dst.len() - before) as u64);
        }
        Ok(())
    }
}
