//! # Meshtastic link layer
//!
//! The rest of the crate only sees the two traits defined here:
//!
//! - [`Transport`] opens a [`Session`] for a [`ConnectionDescriptor`]
//! - [`Session`] sends text, reads and sets the node's identity, reports liveness and
//!   hands out the inbound message feed exactly once
//!
//! [`StreamTransport`] is the real implementation (TCP port 4403 or USB serial,
//! stream API framing, see [`framing`] and [`proto`]). Tests plug in scripted fakes.
//!
//! Inbound packets are validated once at the boundary ([`InboundMessage::from_packet`]);
//! everything downstream works with required fields and explicit `Option`s.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::connection::ConnectionDescriptor;
use crate::errors::TransportError;

pub mod framing;
pub mod proto;
pub mod stream;

pub use stream::StreamTransport;

/// Capacity of a session's inbound queue. When the router falls behind the
/// reader drops new messages instead of growing without bound.
pub const INBOUND_QUEUE: usize = 64;

/// A node number on the mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(proto::BROADCAST_NUM);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Where an outbound text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Node(NodeId),
    Broadcast,
}

impl Destination {
    pub fn node_num(self) -> u32 {
        match self {
            Destination::Node(id) => id.0,
            Destination::Broadcast => proto::BROADCAST_NUM,
        }
    }
}

/// The node's self-reported display names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeIdentity {
    pub short_name: String,
    pub long_name: String,
}

impl NodeIdentity {
    pub fn new(short_name: impl Into<String>, long_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            long_name: long_name.into(),
        }
    }
}

/// Receive-side signal quality. The firmware omits zero values, so zero is
/// treated as "not reported".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalMetrics {
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
}

/// A validated text message received from the mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub sender: NodeId,
    pub destination: NodeId,
    pub channel: u32,
    pub is_broadcast: bool,
    pub text: String,
    pub signal: SignalMetrics,
}

impl InboundMessage {
    pub fn new(
        sender: NodeId,
        destination: NodeId,
        channel: u32,
        text: impl Into<String>,
        signal: SignalMetrics,
    ) -> Self {
        Self {
            sender,
            destination,
            channel,
            is_broadcast: destination.is_broadcast(),
            text: text.into(),
            signal,
        }
    }

    /// Build a message from a decoded text packet. Returns `None` for anything
    /// that is not a plain text message with a known sender.
    pub fn from_packet(pkt: &proto::MeshPacket) -> Option<Self> {
        use proto::mesh_packet::PayloadVariant;
        let data = match &pkt.payload_variant {
            Some(PayloadVariant::Decoded(d)) => d,
            _ => return None,
        };
        if proto::PortNum::try_from(data.portnum).ok()? != proto::PortNum::TextMessageApp {
            return None;
        }
        if pkt.from == 0 {
            return None;
        }
        let signal = SignalMetrics {
            snr: (pkt.rx_snr != 0.0).then_some(pkt.rx_snr),
            rssi: (pkt.rx_rssi != 0).then_some(pkt.rx_rssi),
        };
        Some(Self::new(
            NodeId(pkt.from),
            NodeId(pkt.to),
            pkt.channel,
            String::from_utf8_lossy(&data.payload).into_owned(),
            signal,
        ))
    }
}

/// A configured channel on the node.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChannelInfo {
    pub index: u32,
    pub name: String,
}

/// An open link to the node.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_text(
        &self,
        text: &str,
        destination: Destination,
        channel: u32,
    ) -> Result<(), TransportError>;

    /// Identity last reported by the node, once known.
    fn identity(&self) -> Option<NodeIdentity>;

    /// Ask the node to change its names. The node usually reboots afterwards.
    async fn set_identity(
        &self,
        short_name: Option<&str>,
        long_name: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Broadcast our identity so peers refresh their node lists.
    async fn announce_identity(&self) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;

    /// Follows `is_alive`; flips to false once when the link dies.
    fn liveness(&self) -> watch::Receiver<bool>;

    /// Last reported position of `node` in degrees.
    fn node_position(&self, node: NodeId) -> Option<(f64, f64)>;

    fn node_count(&self) -> usize;

    fn channels(&self) -> Vec<ChannelInfo>;

    /// The inbound feed. Only the first call returns `Some`.
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::{mesh_packet::PayloadVariant, Data, MeshPacket, PortNum};

    fn text_packet(from: u32, to: u32, text: &str) -> MeshPacket {
        MeshPacket {
            from,
            to,
            channel: 2,
            payload_variant: Some(PayloadVariant::Decoded(Data {
                portnum: PortNum::TextMessageApp as i32,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            })),
            rx_snr: 5.5,
            ..Default::default()
        }
    }

    #[test]
    fn node_id_formats_like_the_firmware() {
        assert_eq!(NodeId(0x1a2b).to_string(), "!00001a2b");
        assert_eq!(NodeId::BROADCAST.to_string(), "!ffffffff");
    }

    #[test]
    fn broadcast_text_packet_is_flagged() {
        let msg = InboundMessage::from_packet(&text_packet(7, proto::BROADCAST_NUM, "wx1")).unwrap();
        assert!(msg.is_broadcast);
        assert_eq!(msg.channel, 2);
        assert_eq!(msg.text, "wx1");
        assert_eq!(msg.signal.snr, Some(5.5));
        assert_eq!(msg.signal.rssi, None);
    }

    #[test]
    fn non_text_and_anonymous_packets_are_skipped() {
        let mut pkt = text_packet(7, 9, "x");
        if let Some(PayloadVariant::Decoded(d)) = pkt.payload_variant.as_mut() {
            d.portnum = PortNum::PositionApp as i32;
        }
        assert!(InboundMessage::from_packet(&pkt).is_none());
        assert!(InboundMessage::from_packet(&text_packet(0, 9, "x")).is_none());

        let encrypted = MeshPacket {
            from: 7,
            payload_variant: Some(PayloadVariant::Encrypted(vec![1, 2, 3])),
            ..Default::default()
        };
        assert!(InboundMessage::from_packet(&encrypted).is_none());
    }
}
