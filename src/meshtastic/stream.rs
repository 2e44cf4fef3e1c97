//! Stream API client (TCP and USB serial).
//!
//! One reader per session decodes `FromRadio` frames and keeps a small node database
//! (our node number, users, positions, channels). Text packets are validated into
//! [`InboundMessage`]s and pushed onto the session's bounded queue. Writes go through
//! a [`Sink`] that serialises frames onto the socket or port.
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::io::{Read, Write};

use super::framing::{encode_frame, FrameDecoder};
use super::proto::{self, from_radio, mesh_packet, to_radio, PortNum};
use super::{
    ChannelInfo, Destination, InboundMessage, NodeId, NodeIdentity, Session, Transport,
    INBOUND_QUEUE,
};
use crate::config::Config;
use crate::connection::{ConnectionDescriptor, ConnectionKind};
use crate::errors::TransportError;
use crate::logutil::escape_log;
use crate::metrics;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);
const HOP_LIMIT: u32 = 3;
/// MeshPacket priority RELIABLE, used for DMs so the radio transmits them promptly.
const PRIORITY_RELIABLE: i32 = 70;

/// Opens stream API sessions over TCP or serial.
#[derive(Debug, Clone)]
pub struct StreamTransport {
    tcp_port: u16,
    baud_rate: u32,
    connect_timeout: Duration,
}

impl StreamTransport {
    pub fn new(tcp_port: u16, baud_rate: u32, connect_timeout: Duration) -> Self {
        Self {
            tcp_port,
            baud_rate,
            connect_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.connection.tcp_port,
            config.connection.baud_rate,
            config.timing.connect_timeout(),
        )
    }

    fn tcp_target(&self, address: &str) -> String {
        if address.parse::<std::net::SocketAddr>().is_ok() {
            address.to_string()
        } else {
            format!("{}:{}", address, self.tcp_port)
        }
    }

    async fn open_tcp(&self, address: &str) -> Result<Arc<StreamSession>, TransportError> {
        let target = self.tcp_target(address);
        debug!("Opening TCP link to {}", target);
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| TransportError::Timeout(timeout_ms))??;
        let _ = stream.set_nodelay(true);
        let (mut reader, writer) = stream.into_split();

        let (session, shared) = StreamSession::new(target, Sink::Tcp(tokio::sync::Mutex::new(writer)));
        let reader_task = tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("{}: peer closed the stream", shared.label);
                        break;
                    }
                    Ok(n) => {
                        decoder.push(&buf[..n]);
                        while let Some(frame) = decoder.next_frame() {
                            shared.handle_frame(&frame);
                        }
                    }
                    Err(e) => {
                        debug!("{}: read error: {}", shared.label, e);
                        break;
                    }
                }
            }
            shared.mark_dead();
        });
        session.track(reader_task);
        Ok(session)
    }

    #[cfg(feature = "serial")]
    async fn open_serial(&self, path: &str) -> Result<Arc<StreamSession>, TransportError> {
        let path = if path.eq_ignore_ascii_case("auto") || path.is_empty() {
            auto_detect_serial()?
        } else {
            path.to_string()
        };
        debug!("Opening serial port {} at {} baud", path, self.baud_rate);

        let mut builder =
            serialport::new(path.as_str(), self.baud_rate).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| TransportError::Serial(format!("failed to open {}: {}", path, e)))?;
        // Wake the device
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        let mut read_port = port
            .try_clone()
            .map_err(|e| TransportError::Serial(format!("failed to clone {}: {}", path, e)))?;

        let (session, shared) = StreamSession::new(path, Sink::Serial(Arc::new(Mutex::new(port))));
        let reader_task = tokio::task::spawn_blocking(move || {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 1024];
            while shared.is_alive() {
                match read_port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        decoder.push(&buf[..n]);
                        while let Some(frame) = decoder.next_frame() {
                            shared.handle_frame(&frame);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        debug!("{}: serial read error: {}", shared.label, e);
                        break;
                    }
                }
            }
            shared.mark_dead();
        });
        session.track(reader_task);
        Ok(session)
    }

    #[cfg(not(feature = "serial"))]
    async fn open_serial(&self, path: &str) -> Result<Arc<StreamSession>, TransportError> {
        Err(TransportError::Unsupported(format!(
            "serial link to {} (built without the serial feature)",
            path
        )))
    }

    /// Send want_config and wait until the node has told us who it is.
    async fn handshake(&self, session: &Arc<StreamSession>) -> Result<(), TransportError> {
        let mut config_id: u32 = rand::random();
        if config_id == 0 {
            config_id = 1;
        }
        debug!("{}: want_config_id=0x{:08x}", session.shared.label, config_id);
        session
            .send_toradio(to_radio::PayloadVariant::WantConfigId(config_id))
            .await?;

        let mut ready = session.shared.ready.subscribe();
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let waited = tokio::time::timeout(self.connect_timeout, async {
            ready.wait_for(|r| *r).await.is_ok()
        })
        .await;
        match waited {
            Ok(true) if session.is_alive() => Ok(()),
            Ok(_) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout(timeout_ms)),
        }
    }
}

#[cfg(feature = "serial")]
fn auto_detect_serial() -> Result<String, TransportError> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Serial(format!("failed to list ports: {}", e)))?;
    ports
        .into_iter()
        .find(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
        .map(|p| p.port_name)
        .ok_or(TransportError::NoSerialPort)
}

#[async_trait]
impl Transport for StreamTransport {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let session = match descriptor.kind {
            ConnectionKind::Tcp => self.open_tcp(&descriptor.address).await?,
            ConnectionKind::Serial => self.open_serial(&descriptor.address).await?,
        };
        if let Err(e) = self.handshake(&session).await {
            let _ = session.close().await;
            return Err(e);
        }
        session.start_heartbeat();
        info!(
            "Link to {} up (node {})",
            session.shared.label,
            session.shared.my_node().map(NodeId).map(|n| n.to_string()).unwrap_or_default()
        );
        Ok(session)
    }
}

enum Sink {
    Tcp(tokio::sync::Mutex<OwnedWriteHalf>),
    #[cfg(feature = "serial")]
    Serial(Arc<Mutex<Box<dyn SerialPort>>>),
}

impl Sink {
    async fn write_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        match self {
            Sink::Tcp(writer) => {
                let mut w = writer.lock().await;
                w.write_all(&frame).await?;
                w.flush().await?;
                Ok(())
            }
            #[cfg(feature = "serial")]
            Sink::Serial(port) => {
                let port = port.clone();
                tokio::task::spawn_blocking(move || {
                    let mut p = port
                        .lock()
                        .map_err(|_| TransportError::Serial("port lock poisoned".into()))?;
                    p.write_all(&frame)?;
                    p.flush()?;
                    Ok::<(), TransportError>(())
                })
                .await
                .map_err(|e| TransportError::Serial(e.to_string()))?
            }
        }
    }
}

#[derive(Default)]
struct NodeDb {
    my_node: Option<u32>,
    users: HashMap<u32, proto::User>,
    positions: HashMap<u32, (f64, f64)>,
    channels: BTreeMap<u32, ChannelInfo>,
}

/// State shared between a session and its reader.
struct Shared {
    label: String,
    db: Mutex<NodeDb>,
    alive: watch::Sender<bool>,
    ready: watch::Sender<bool>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl Shared {
    fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    fn mark_dead(&self) {
        if self.alive.send_replace(false) {
            debug!("{}: link marked dead", self.label);
        }
        // Wake anyone still waiting on the handshake
        self.ready.send_replace(true);
    }

    fn my_node(&self) -> Option<u32> {
        self.db.lock().ok().and_then(|db| db.my_node)
    }

    fn handle_frame(&self, frame: &[u8]) {
        let msg = match proto::FromRadio::decode(frame) {
            Ok(m) => m,
            Err(e) => {
                trace!("{}: undecodable frame ({} bytes): {}", self.label, frame.len(), e);
                return;
            }
        };
        let Some(variant) = msg.payload_variant else {
            return;
        };
        match variant {
            from_radio::PayloadVariant::Packet(pkt) => self.handle_packet(pkt),
            from_radio::PayloadVariant::MyInfo(info) => {
                debug!("{}: my node {}", self.label, NodeId(info.my_node_num));
                if let Ok(mut db) = self.db.lock() {
                    db.my_node = Some(info.my_node_num);
                }
            }
            from_radio::PayloadVariant::NodeInfo(ni) => {
                if let Ok(mut db) = self.db.lock() {
                    if let Some(user) = ni.user {
                        db.users.insert(ni.num, user);
                    }
                    if let Some(pos) = ni.position.as_ref().and_then(position_degrees) {
                        db.positions.insert(ni.num, pos);
                    }
                }
            }
            from_radio::PayloadVariant::Channel(ch) => {
                // role 0 = disabled
                if ch.role != 0 && ch.index >= 0 {
                    let name = ch
                        .settings
                        .map(|s| s.name)
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| format!("Channel {}", ch.index));
                    if let Ok(mut db) = self.db.lock() {
                        db.channels.insert(
                            ch.index as u32,
                            ChannelInfo {
                                index: ch.index as u32,
                                name,
                            },
                        );
                    }
                }
            }
            from_radio::PayloadVariant::ConfigCompleteId(id) => {
                debug!("{}: config complete (id=0x{:08x})", self.label, id);
                self.ready.send_replace(true);
            }
            from_radio::PayloadVariant::Rebooted(_) => {
                warn!("{}: node reported a reboot", self.label);
                self.mark_dead();
            }
        }
    }

    fn handle_packet(&self, pkt: proto::MeshPacket) {
        let data = match &pkt.payload_variant {
            Some(mesh_packet::PayloadVariant::Decoded(d)) => d,
            _ => return,
        };
        match PortNum::try_from(data.portnum) {
            Ok(PortNum::TextMessageApp) => {
                let Some(msg) = InboundMessage::from_packet(&pkt) else {
                    return;
                };
                trace!(
                    "{}: text from {} ch={} '{}'",
                    self.label,
                    msg.sender,
                    msg.channel,
                    escape_log(&msg.text)
                );
                match self.inbound_tx.try_send(msg) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        metrics::inc_inbound_dropped();
                        warn!(
                            "{}: inbound queue full, dropping message from {}",
                            self.label, dropped.sender
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            Ok(PortNum::NodeinfoApp) => {
                if let Ok(user) = proto::User::decode(data.payload.as_slice()) {
                    if let Ok(mut db) = self.db.lock() {
                        db.users.insert(pkt.from, user);
                    }
                }
            }
            Ok(PortNum::PositionApp) => {
                if let Ok(pos) = proto::Position::decode(data.payload.as_slice()) {
                    if let Some(deg) = position_degrees(&pos) {
                        if let Ok(mut db) = self.db.lock() {
                            db.positions.insert(pkt.from, deg);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn position_degrees(pos: &proto::Position) -> Option<(f64, f64)> {
    let lat = pos.latitude_i?;
    let lon = pos.longitude_i?;
    if lat == 0 && lon == 0 {
        return None;
    }
    Some((lat as f64 * 1e-7, lon as f64 * 1e-7))
}

/// A live stream API session.
pub struct StreamSession {
    shared: Arc<Shared>,
    sink: Sink,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_packet_id: AtomicU32,
}

impl StreamSession {
    fn new(label: String, sink: Sink) -> (Arc<Self>, Arc<Shared>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let (ready, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            label,
            db: Mutex::new(NodeDb::default()),
            alive: watch::channel(true).0,
            ready,
            inbound_tx,
        });
        let session = Arc::new(Self {
            shared: shared.clone(),
            sink,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
            next_packet_id: AtomicU32::new(rand::random::<u32>() | 1),
        });
        (session, shared)
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
            let mut nonce: u32 = 0;
            loop {
                ticker.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if !session.is_alive() {
                    break;
                }
                nonce = nonce.wrapping_add(1);
                let hb = to_radio::PayloadVariant::Heartbeat(proto::Heartbeat { nonce });
                if let Err(e) = session.send_toradio(hb).await {
                    debug!("{}: heartbeat failed: {}", session.shared.label, e);
                    break;
                }
            }
        });
        self.track(task);
    }

    async fn send_toradio(&self, variant: to_radio::PayloadVariant) -> Result<(), TransportError> {
        let msg = proto::ToRadio {
            payload_variant: Some(variant),
        };
        let mut payload = Vec::with_capacity(256);
        msg.encode(&mut payload)?;
        let frame = encode_frame(&payload)?;
        self.sink.write_frame(frame).await?;
        trace!("{}: sent ToRadio ({} bytes payload)", self.shared.label, payload.len());
        Ok(())
    }

    fn packet_id(&self) -> u32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn require_my_node(&self) -> Result<u32, TransportError> {
        self.shared.my_node().ok_or(TransportError::NotReady("my_info"))
    }

    fn my_user(&self, my_node: u32) -> proto::User {
        self.shared
            .db
            .lock()
            .ok()
            .and_then(|db| db.users.get(&my_node).cloned())
            .unwrap_or_else(|| proto::User {
                id: NodeId(my_node).to_string(),
                ..Default::default()
            })
    }

    async fn send_data(
        &self,
        to: u32,
        channel: u32,
        data: proto::Data,
        want_ack: bool,
    ) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        let from = self.require_my_node()?;
        let pkt = proto::MeshPacket {
            from,
            to,
            channel,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(data)),
            id: self.packet_id(),
            hop_limit: HOP_LIMIT,
            want_ack,
            priority: if want_ack { PRIORITY_RELIABLE } else { 0 },
            ..Default::default()
        };
        self.send_toradio(to_radio::PayloadVariant::Packet(pkt)).await
    }
}

#[async_trait]
impl Session for StreamSession {
    async fn send_text(
        &self,
        text: &str,
        destination: Destination,
        channel: u32,
    ) -> Result<(), TransportError> {
        let is_dm = matches!(destination, Destination::Node(_));
        let data = proto::Data {
            portnum: PortNum::TextMessageApp as i32,
            payload: text.as_bytes().to_vec(),
            ..Default::default()
        };
        self.send_data(destination.node_num(), channel, data, is_dm).await?;
        debug!(
            "{}: sent text to {} ch={} '{}'",
            self.shared.label,
            NodeId(destination.node_num()),
            channel,
            escape_log(text)
        );
        Ok(())
    }

    fn identity(&self) -> Option<NodeIdentity> {
        let db = self.shared.db.lock().ok()?;
        let me = db.my_node?;
        let user = db.users.get(&me)?;
        Some(NodeIdentity::new(user.short_name.clone(), user.long_name.clone()))
    }

    async fn set_identity(
        &self,
        short_name: Option<&str>,
        long_name: Option<&str>,
    ) -> Result<(), TransportError> {
        let me = self.require_my_node()?;
        let mut user = self.my_user(me);
        if let Some(s) = short_name {
            user.short_name = s.to_string();
        }
        if let Some(l) = long_name {
            user.long_name = l.to_string();
        }
        let admin = proto::AdminMessage {
            payload_variant: Some(proto::admin_message::PayloadVariant::SetOwner(user)),
        };
        let data = proto::Data {
            portnum: PortNum::AdminApp as i32,
            payload: admin.encode_to_vec(),
            want_response: true,
            ..Default::default()
        };
        self.send_data(me, 0, data, true).await
    }

    async fn announce_identity(&self) -> Result<(), TransportError> {
        let me = self.require_my_node()?;
        let user = self.my_user(me);
        let data = proto::Data {
            portnum: PortNum::NodeinfoApp as i32,
            payload: user.encode_to_vec(),
            ..Default::default()
        };
        self.send_data(proto::BROADCAST_NUM, 0, data, false).await
    }

    fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.shared.alive.subscribe()
    }

    fn node_position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.shared.db.lock().ok()?.positions.get(&node.0).copied()
    }

    fn node_count(&self) -> usize {
        self.shared.db.lock().map(|db| db.users.len()).unwrap_or(0)
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        self.shared
            .db
            .lock()
            .map(|db| db.channels.values().cloned().collect())
            .unwrap_or_default()
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().ok()?.take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        let was_alive = self.shared.alive.send_replace(false);
        let result = if was_alive {
            self.send_toradio(to_radio::PayloadVariant::Disconnect(true)).await
        } else {
            Ok(())
        };
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut t| t.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }
        self.shared.ready.send_replace(true);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn from_radio(variant: from_radio::PayloadVariant) -> Vec<u8> {
        let msg = proto::FromRadio {
            id: 0,
            payload_variant: Some(variant),
        };
        encode_frame(&msg.encode_to_vec()).unwrap()
    }

    /// Minimal fake node: answers want_config with my_info, our user and config_complete,
    /// then sends one text message and records everything it receives.
    async fn fake_node(listener: TcpListener, received: mpsc::UnboundedSender<proto::ToRadio>) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        let mut greeted = false;
        loop {
            let n = match sock.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            while let Some(frame) = decoder.next_frame() {
                let msg = proto::ToRadio::decode(frame.as_slice()).unwrap();
                let want_config = matches!(
                    msg.payload_variant,
                    Some(to_radio::PayloadVariant::WantConfigId(_))
                );
                let _ = received.send(msg);
                if want_config && !greeted {
                    greeted = true;
                    let mut out = Vec::new();
                    out.extend(b"DEBUG | boot noise\r\n");
                    out.extend(from_radio(from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
                        my_node_num: 0xabcd,
                    })));
                    out.extend(from_radio(from_radio::PayloadVariant::NodeInfo(proto::NodeInfo {
                        num: 0xabcd,
                        user: Some(proto::User {
                            id: "!0000abcd".into(),
                            long_name: "Base Station".into(),
                            short_name: "ON".into(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })));
                    out.extend(from_radio(from_radio::PayloadVariant::Channel(proto::Channel {
                        index: 2,
                        settings: Some(proto::ChannelSettings {
                            name: "cmd".into(),
                            ..Default::default()
                        }),
                        role: 2,
                    })));
                    out.extend(from_radio(from_radio::PayloadVariant::ConfigCompleteId(1)));
                    out.extend(from_radio(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                        from: 0x1234,
                        to: 0xabcd,
                        payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                            portnum: PortNum::TextMessageApp as i32,
                            payload: b"help".to_vec(),
                            ..Default::default()
                        })),
                        ..Default::default()
                    })));
                    sock.write_all(&out).await.unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn tcp_session_handshakes_and_delivers_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_node(listener, tx));

        let transport = StreamTransport::new(4403, 115200, Duration::from_secs(5));
        let desc = ConnectionDescriptor::new(ConnectionKind::Tcp, addr.to_string());
        let session = transport.connect(&desc).await.unwrap();

        assert!(session.is_alive());
        assert_eq!(session.identity(), Some(NodeIdentity::new("ON", "Base Station")));
        assert_eq!(session.channels()[0].name, "cmd");

        let mut inbound = session.take_inbound().unwrap();
        assert!(session.take_inbound().is_none());
        let msg = inbound.recv().await.unwrap();
        assert_eq!(msg.sender, NodeId(0x1234));
        assert_eq!(msg.text, "help");
        assert!(!msg.is_broadcast);

        session
            .send_text("pong", Destination::Node(NodeId(0x1234)), 0)
            .await
            .unwrap();

        // want_config first, then our text packet
        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.payload_variant,
            Some(to_radio::PayloadVariant::WantConfigId(_))
        ));
        let second = rx.recv().await.unwrap();
        match second.payload_variant {
            Some(to_radio::PayloadVariant::Packet(p)) => {
                assert_eq!(p.to, 0x1234);
                assert_eq!(p.from, 0xabcd);
                assert!(p.want_ack);
            }
            other => panic!("unexpected {:?}", other),
        }

        session.close().await.unwrap();
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport = StreamTransport::new(4403, 115200, Duration::from_secs(1));
        let desc = ConnectionDescriptor::new(ConnectionKind::Tcp, addr.to_string());
        assert!(transport.connect(&desc).await.is_err());
    }

    #[test]
    fn bare_host_gets_default_port() {
        let t = StreamTransport::new(4403, 115200, Duration::from_secs(1));
        assert_eq!(t.tcp_target("10.0.0.5"), "10.0.0.5:4403");
        assert_eq!(t.tcp_target("10.0.0.5:9000"), "10.0.0.5:9000");
        assert_eq!(t.tcp_target("node.local"), "node.local:4403");
    }
}
