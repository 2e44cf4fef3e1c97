//! Shared fakes for the scenario tests: an in-memory "network" of nodes keyed by
//! address, a recording session, a probe backed by the same network, and a canned
//! weather provider.
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use meshupgrade::bot::alerts::AlertRecord;
use meshupgrade::bot::weather::{Location, WeatherProvider};
use meshupgrade::bot::AlertBroadcastGuard;
use meshupgrade::config::Config;
use meshupgrade::connection::{ConnectionDescriptor, ConnectionManager, DiscoveryScanner, PortProbe};
use meshupgrade::errors::TransportError;
use meshupgrade::meshtastic::{
    ChannelInfo, Destination, InboundMessage, NodeId, NodeIdentity, Session, SignalMetrics,
    Transport,
};
use meshupgrade::recovery::RecoveryOrchestrator;

/// One outbound text as the session saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub text: String,
    pub destination: Destination,
    pub channel: u32,
}

#[derive(Default)]
struct NetInner {
    nodes: Mutex<HashMap<String, NodeIdentity>>,
    opened: Mutex<Vec<(String, Arc<FakeSession>)>>,
    connects: AtomicUsize,
    reboot_on_rename: AtomicBool,
    broken_announce: AtomicBool,
}

/// Nodes reachable by address. Renames made through a session stick to the
/// address, so a reconnect after "reboot" sees the new name.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    inner: Arc<NetInner>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, address: &str, short_name: &str) {
        self.inner.nodes.lock().unwrap().insert(
            address.to_string(),
            NodeIdentity::new(short_name, format!("{} node", short_name)),
        );
    }

    pub fn remove_node(&self, address: &str) {
        self.inner.nodes.lock().unwrap().remove(address);
    }

    /// Sessions drop dead after a rename, like a rebooting node.
    pub fn reboot_on_rename(&self, on: bool) {
        self.inner.reboot_on_rename.store(on, Ordering::SeqCst);
    }

    /// Announces on sessions opened from now on fail with a broken pipe.
    pub fn break_announces(&self, on: bool) {
        self.inner.broken_announce.store(on, Ordering::SeqCst);
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(FakeTransport { net: self.clone() })
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn name_at(&self, address: &str) -> Option<String> {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .get(address)
            .map(|i| i.short_name.clone())
    }

    pub fn sessions(&self) -> Vec<(String, Arc<FakeSession>)> {
        self.inner.opened.lock().unwrap().clone()
    }

    /// Most recent session opened for `address`.
    pub fn session(&self, address: &str) -> Arc<FakeSession> {
        self.sessions()
            .into_iter()
            .rev()
            .find(|(a, _)| a == address)
            .map(|(_, s)| s)
            .expect("no session opened for address")
    }

    pub fn latest(&self) -> Arc<FakeSession> {
        self.sessions().last().map(|(_, s)| s.clone()).expect("no session opened")
    }

    /// Every rename seen by any session, in order.
    pub fn renames(&self) -> Vec<String> {
        self.sessions()
            .iter()
            .flat_map(|(_, s)| s.renames.lock().unwrap().clone())
            .collect()
    }

    fn has_host(&self, ip: &str) -> bool {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .keys()
            .any(|a| a == ip || a.split(':').next() == Some(ip))
    }

    fn rename(&self, address: &str, short_name: &str) {
        if let Some(id) = self.inner.nodes.lock().unwrap().get_mut(address) {
            id.short_name = short_name.to_string();
        }
    }
}

pub struct FakeTransport {
    net: FakeNetwork,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Arc<dyn Session>, TransportError> {
        self.net.inner.connects.fetch_add(1, Ordering::SeqCst);
        let identity = self
            .net
            .inner
            .nodes
            .lock()
            .unwrap()
            .get(&descriptor.address)
            .cloned();
        let Some(identity) = identity else {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        };
        let session = Arc::new(FakeSession::new(
            self.net.clone(),
            descriptor.address.clone(),
            identity,
        ));
        self.net
            .inner
            .opened
            .lock()
            .unwrap()
            .push((descriptor.address.clone(), session.clone()));
        Ok(session)
    }
}

pub struct FakeSession {
    net: FakeNetwork,
    address: String,
    identity: Mutex<NodeIdentity>,
    alive: watch::Sender<bool>,
    broken_announce: bool,
    pub sent: Mutex<Vec<Sent>>,
    pub renames: Mutex<Vec<String>>,
    pub announces: AtomicUsize,
    pub closed: AtomicBool,
    positions: Mutex<HashMap<u32, (f64, f64)>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl FakeSession {
    fn new(net: FakeNetwork, address: String, identity: NodeIdentity) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let broken_announce = net.inner.broken_announce.load(Ordering::SeqCst);
        Self {
            net,
            address,
            identity: Mutex::new(identity),
            alive: watch::channel(true).0,
            broken_announce,
            sent: Mutex::new(Vec::new()),
            renames: Mutex::new(Vec::new()),
            announces: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            positions: Mutex::new(HashMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Simulate the link dropping.
    pub fn kill(&self) {
        self.alive.send_replace(false);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_position(&self, node: NodeId, lat: f64, lon: f64) {
        self.positions.lock().unwrap().insert(node.0, (lat, lon));
    }

    pub async fn deliver(&self, msg: InboundMessage) {
        self.inbound_tx.send(msg).await.expect("inbound feed closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn send_text(
        &self,
        text: &str,
        destination: Destination,
        channel: u32,
    ) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(Sent {
            text: text.to_string(),
            destination,
            channel,
        });
        Ok(())
    }

    fn identity(&self) -> Option<NodeIdentity> {
        Some(self.identity.lock().unwrap().clone())
    }

    async fn set_identity(
        &self,
        short_name: Option<&str>,
        long_name: Option<&str>,
    ) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Closed);
        }
        {
            let mut id = self.identity.lock().unwrap();
            if let Some(s) = short_name {
                id.short_name = s.to_string();
                self.renames.lock().unwrap().push(s.to_string());
                self.net.rename(&self.address, s);
            }
            if let Some(l) = long_name {
                id.long_name = l.to_string();
            }
        }
        if self.net.inner.reboot_on_rename.load(Ordering::SeqCst) {
            self.kill();
        }
        Ok(())
    }

    async fn announce_identity(&self) -> Result<(), TransportError> {
        if self.broken_announce {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        self.announces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    fn liveness(&self) -> watch::Receiver<bool> {
        self.alive.subscribe()
    }

    fn node_position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.positions.lock().unwrap().get(&node.0).copied()
    }

    fn node_count(&self) -> usize {
        self.positions.lock().unwrap().len() + 1
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        vec![
            ChannelInfo {
                index: 0,
                name: "LongFast".into(),
            },
            ChannelInfo {
                index: 2,
                name: "Bot".into(),
            },
        ]
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().unwrap().take()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.kill();
        Ok(())
    }
}

/// Port probe that answers for every host the network knows about.
pub struct NetworkProbe {
    net: FakeNetwork,
    pub probed: AtomicUsize,
}

impl NetworkProbe {
    pub fn new(net: &FakeNetwork) -> Self {
        Self {
            net: net.clone(),
            probed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PortProbe for NetworkProbe {
    async fn probe(&self, addr: SocketAddr, _timeout: Duration) -> bool {
        self.probed.fetch_add(1, Ordering::SeqCst);
        self.net.has_host(&addr.ip().to_string())
    }
}

/// Weather provider with fixed answers.
#[derive(Default)]
pub struct CannedWeather {
    pub alerts: Mutex<Vec<AlertRecord>>,
    pub calls: AtomicUsize,
    pub last_location: Mutex<Option<Location>>,
    pub fail: AtomicBool,
}

impl CannedWeather {
    pub fn with_alerts(alerts: Vec<AlertRecord>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
            ..Default::default()
        }
    }

    fn hit(&self, at: Location) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_location.lock().unwrap() = Some(at);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("provider unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl WeatherProvider for CannedWeather {
    async fn daily_summary(&self, at: Location) -> Result<String> {
        self.hit(at)?;
        Ok("5-day: sunny".to_string())
    }

    async fn hourly_summary(&self, at: Location) -> Result<String> {
        self.hit(at)?;
        Ok("Hourly: clear".to_string())
    }

    async fn current_conditions(&self, at: Location) -> Result<String> {
        self.hit(at)?;
        Ok("Now: 72F".to_string())
    }

    async fn for_date(&self, at: Location, date: NaiveDate) -> Result<Option<String>> {
        self.hit(at)?;
        if date.format("%Y").to_string() == "1999" {
            return Ok(None);
        }
        Ok(Some(format!("Forecast {}: rain", date)))
    }

    async fn for_hour(&self, at: Location, time: NaiveTime) -> Result<Option<String>> {
        self.hit(at)?;
        Ok(Some(format!("At {}: windy", time.format("%H:%M"))))
    }

    async fn active_alerts(&self, at: Location) -> Result<Vec<AlertRecord>> {
        self.hit(at)?;
        Ok(self.alerts.lock().unwrap().clone())
    }
}

pub fn alert(id: &str, event: &str) -> AlertRecord {
    AlertRecord {
        id: id.to_string(),
        event: event.to_string(),
        headline: format!("{} in effect", event),
        severity: "Severe".to_string(),
    }
}

pub fn dm(from: u32, text: &str) -> InboundMessage {
    InboundMessage::new(NodeId(from), NodeId(0x0a0b0c0d), 0, text, SignalMetrics::default())
}

pub fn channel_msg(from: u32, channel: u32, text: &str) -> InboundMessage {
    InboundMessage::new(NodeId(from), NodeId::BROADCAST, channel, text, SignalMetrics::default())
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.connection.address = "10.0.0.5".to_string();
    cfg.logging.file = None;
    cfg
}

/// Connection manager, guard, scanner and orchestrator over one fake network.
pub struct Rig {
    pub net: FakeNetwork,
    pub config: Config,
    pub conn: Arc<ConnectionManager>,
    pub guard: Arc<AlertBroadcastGuard>,
    pub recovery: Arc<RecoveryOrchestrator>,
}

impl Rig {
    pub fn new(net: &FakeNetwork) -> Self {
        let config = test_config();
        let transport = net.transport();
        let conn = Arc::new(ConnectionManager::new(transport.clone()));
        let guard = Arc::new(AlertBroadcastGuard::from_timing(conn.clone(), &config.timing));
        let scanner = Arc::new(scanner_for(net, &config));
        let recovery = Arc::new(RecoveryOrchestrator::new(
            conn.clone(),
            scanner,
            guard.clone(),
            &config.timing,
        ));
        Self {
            net: net.clone(),
            config,
            conn,
            guard,
            recovery,
        }
    }
}

pub fn scanner_for(net: &FakeNetwork, config: &Config) -> DiscoveryScanner {
    DiscoveryScanner::from_config(net.transport(), config).with_probe(Arc::new(NetworkProbe::new(net)))
}
