//! # Connection management
//!
//! [`ConnectionManager`] owns at most one [`Session`] to the node and remembers the
//! last descriptor that connected successfully. That descriptor is what `reconnect`
//! reuses and what the watchdog checks to decide whether a drop was unexpected.
//!
//! Sessions come and go (reconnects, discovered relocations) but the manager exposes
//! one stable inbound queue: every adopted session's feed is forwarded into it, so the
//! router task never has to re-subscribe.
//!
//! Session replacement happens under a single write lock. Readers (router, watchdog)
//! clone the `Arc` out and never hold the lock across an await.
//!
//! The manager also watches the adopted session's liveness: when the link dies on its
//! own (EOF, node reboot, reset) the state moves from `Connected` to `Disconnected`
//! without waiting for the watchdog.

use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::TransportError;
use crate::logutil::escape_log;
use crate::meshtastic::{
    ChannelInfo, Destination, InboundMessage, NodeId, NodeIdentity, Session, Transport,
    INBOUND_QUEUE,
};
use crate::metrics;

pub mod discovery;

pub use discovery::{Discovered, DiscoveryScanner, PortProbe, TcpProbe};

/// Hard limit of the radio text payload, in characters.
pub const MAX_OUTBOUND_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Tcp,
    Serial,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Tcp => write!(f, "TCP"),
            ConnectionKind::Serial => write!(f, "Serial"),
        }
    }
}

/// How to reach the node. Replaced wholesale on every successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub kind: ConnectionKind,
    pub address: String,
}

impl ConnectionDescriptor {
    pub fn new(kind: ConnectionKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self::new(ConnectionKind::Tcp, address)
    }

    pub fn serial(path: impl Into<String>) -> Self {
        Self::new(ConnectionKind::Serial, path)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
    Discovering,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Discovering => "Discovering",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Cut `text` to the radio limit. Longer input keeps its first 197 characters and
/// gets `...` appended.
pub fn truncate_outbound(text: &str) -> String {
    let count = text.chars().count();
    if count <= MAX_OUTBOUND_CHARS {
        return text.to_string();
    }
    let keep = MAX_OUTBOUND_CHARS - ELLIPSIS.len();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    metrics::inc_truncated();
    warn!(
        "Outbound message truncated from {} to {} chars: '{}'",
        count,
        MAX_OUTBOUND_CHARS,
        escape_log(&out)
    );
    out
}

#[derive(Default)]
struct Inner {
    session: Option<Arc<dyn Session>>,
    descriptor: Option<ConnectionDescriptor>,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    inner: RwLock<Inner>,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    /// Feed forwarder and liveness monitor of the current session.
    session_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped on every adopt/close so a stale monitor cannot touch the state.
    generation: Arc<AtomicU64>,
    last_identity: Mutex<Option<NodeIdentity>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        Self {
            transport,
            inner: RwLock::new(Inner::default()),
            state: Arc::new(state),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            session_tasks: Mutex::new(Vec::new()),
            generation: Arc::new(AtomicU64::new(0)),
            last_identity: Mutex::new(None),
        }
    }

    pub async fn connect_tcp(&self, address: &str) -> Result<(), TransportError> {
        self.connect(ConnectionDescriptor::tcp(address)).await
    }

    /// `None` picks the first USB serial device.
    pub async fn connect_serial(&self, path: Option<&str>) -> Result<(), TransportError> {
        self.connect(ConnectionDescriptor::serial(path.unwrap_or("auto")))
            .await
    }

    /// Open a session for `descriptor` and adopt it. Failures are logged and leave
    /// the state at `Failed`; the previous descriptor is kept.
    pub async fn connect(&self, descriptor: ConnectionDescriptor) -> Result<(), TransportError> {
        info!("Connecting to {}", descriptor);
        match self.transport.connect(&descriptor).await {
            Ok(session) => {
                self.adopt(descriptor, session).await;
                Ok(())
            }
            Err(e) => {
                error!("Connect to {} failed: {}", descriptor, e);
                self.state.send_replace(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    /// Connect again using the last descriptor that worked.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        let Some(descriptor) = self.descriptor() else {
            warn!("Reconnect requested but no previous connection is known");
            return Err(TransportError::NotReady("no previous connection"));
        };
        self.connect(descriptor).await
    }

    /// Install an already-open session (from `connect` or discovery) as the active one.
    pub async fn adopt(&self, descriptor: ConnectionDescriptor, session: Arc<dyn Session>) {
        let feed = session.take_inbound();
        if let Some(identity) = session.identity() {
            self.remember_identity(identity);
        }

        let previous = {
            let mut inner = match self.inner.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            inner.descriptor = Some(descriptor.clone());
            inner.session.replace(session.clone())
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_session_tasks();
        let mut tasks = Vec::with_capacity(2);
        if let Some(forwarder) = self.spawn_forwarder(feed) {
            tasks.push(forwarder);
        }
        self.state.send_replace(ConnectionState::Connected);
        tasks.push(self.spawn_liveness_monitor(session.liveness(), generation));
        if let Ok(mut slot) = self.session_tasks.lock() {
            slot.extend(tasks);
        }
        info!("Connected ({})", descriptor);

        if let Some(old) = previous {
            if !Arc::ptr_eq(&old, &session) {
                if let Err(e) = old.close().await {
                    debug!("Ignoring error while closing replaced session: {}", e);
                }
            }
        }
    }

    fn spawn_forwarder(
        &self,
        feed: Option<mpsc::Receiver<InboundMessage>>,
    ) -> Option<JoinHandle<()>> {
        let mut rx = feed?;
        let tx = self.inbound_tx.clone();
        Some(tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        }))
    }

    fn spawn_liveness_monitor(
        &self,
        mut liveness: watch::Receiver<bool>,
        generation: u64,
    ) -> JoinHandle<()> {
        let state = self.state.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            // A dropped sender means the session is gone as well
            let _ = liveness.wait_for(|alive| !*alive).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let dropped = state.send_if_modified(|s| {
                if *s == ConnectionState::Connected {
                    *s = ConnectionState::Disconnected;
                    true
                } else {
                    false
                }
            });
            if dropped {
                warn!("Link to node lost");
            }
        })
    }

    fn stop_session_tasks(&self) {
        if let Ok(mut slot) = self.session_tasks.lock() {
            for task in slot.drain(..) {
                task.abort();
            }
        }
    }

    /// True iff a session exists and it still reports itself alive.
    pub fn is_connected(&self) -> bool {
        self.session().map(|s| s.is_alive()).unwrap_or(false)
    }

    /// Best-effort teardown. Never fails; teardown errors are only logged at debug.
    pub async fn close(&self) {
        let session = match self.inner.write() {
            Ok(mut inner) => inner.session.take(),
            Err(poisoned) => poisoned.into_inner().session.take(),
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_session_tasks();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                debug!("Suppressed error during close: {}", e);
            }
            info!("Connection closed");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Current state. A stored `Connected` whose session has died reads as
    /// `Disconnected` even before the liveness monitor has run.
    pub fn state(&self) -> ConnectionState {
        let stored = *self.state.borrow();
        if stored == ConnectionState::Connected && !self.is_connected() {
            return ConnectionState::Disconnected;
        }
        stored
    }

    /// Used by recovery to publish which phase the link is in.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.inner.read().ok().and_then(|i| i.descriptor.clone())
    }

    /// A descriptor has been recorded, i.e. some connect has succeeded before.
    pub fn was_connected(&self) -> bool {
        self.descriptor().is_some()
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        self.inner.read().ok().and_then(|i| i.session.clone())
    }

    fn live_session(&self) -> Result<Arc<dyn Session>, TransportError> {
        self.session().ok_or(TransportError::NotReady("not connected"))
    }

    /// The stable inbound queue. Only the first call returns `Some`.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().ok()?.take()
    }

    /// Current identity from the node, falling back to the last one seen.
    pub fn identity(&self) -> Option<NodeIdentity> {
        if let Some(id) = self.session().and_then(|s| s.identity()) {
            self.remember_identity(id.clone());
            return Some(id);
        }
        self.last_identity.lock().ok()?.clone()
    }

    pub fn last_short_name(&self) -> Option<String> {
        self.last_identity
            .lock()
            .ok()?
            .as_ref()
            .map(|i| i.short_name.clone())
            .filter(|s| !s.is_empty())
    }

    fn remember_identity(&self, identity: NodeIdentity) {
        if let Ok(mut last) = self.last_identity.lock() {
            *last = Some(identity);
        }
    }

    pub async fn set_identity(
        &self,
        short_name: Option<&str>,
        long_name: Option<&str>,
    ) -> Result<(), TransportError> {
        let session = self.live_session()?;
        session.set_identity(short_name, long_name).await?;
        let mut expected = self.identity().unwrap_or_default();
        if let Some(s) = short_name {
            expected.short_name = s.to_string();
        }
        if let Some(l) = long_name {
            expected.long_name = l.to_string();
        }
        info!("Identity change sent (short name '{}')", expected.short_name);
        self.remember_identity(expected);
        Ok(())
    }

    pub async fn announce_identity(&self) -> Result<(), TransportError> {
        self.live_session()?.announce_identity().await
    }

    pub async fn send_dm(
        &self,
        text: &str,
        to: NodeId,
        channel: u32,
    ) -> Result<(), TransportError> {
        self.send(text, Destination::Node(to), channel).await
    }

    pub async fn send_broadcast(&self, text: &str, channel: u32) -> Result<(), TransportError> {
        self.send(text, Destination::Broadcast, channel).await
    }

    async fn send(
        &self,
        text: &str,
        destination: Destination,
        channel: u32,
    ) -> Result<(), TransportError> {
        let text = truncate_outbound(text);
        let session = self.live_session().map_err(|e| {
            metrics::inc_send_failed();
            e
        })?;
        match session.send_text(&text, destination, channel).await {
            Ok(()) => {
                match destination {
                    Destination::Node(_) => metrics::inc_dm_sent(),
                    Destination::Broadcast => metrics::inc_broadcast_sent(),
                }
                Ok(())
            }
            Err(e) => {
                metrics::inc_send_failed();
                warn!("Send to {:?} on channel {} failed: {}", destination, channel, e);
                Err(e)
            }
        }
    }

    pub fn node_position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.session()?.node_position(node)
    }

    pub fn node_count(&self) -> usize {
        self.session().map(|s| s.node_count()).unwrap_or(0)
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.session().map(|s| s.channels()).unwrap_or_default()
    }
}
