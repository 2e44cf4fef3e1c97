//! Subnet discovery for a node whose DHCP address changed.
//!
//! A scan is one pass: probe every other host in the /24 for the control port with a
//! short timeout (bounded fan-out), then open a session to each responder in address
//! order and keep the first one whose short name matches. Non-matching sessions are
//! closed. Callers decide whether and when to scan again.
use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::{ConnectionDescriptor, ConnectionKind};
use crate::config::Config;
use crate::errors::DiscoveryError;
use crate::meshtastic::{Session, Transport};
use crate::metrics;

/// Checks whether a host accepts connections on a port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Plain TCP connect probe. Any error counts as "not listening".
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, addr: SocketAddr, wait: Duration) -> bool {
        matches!(timeout(wait, TcpStream::connect(addr)).await, Ok(Ok(_)))
    }
}

/// A session opened during discovery that reported the wanted short name.
pub struct Discovered {
    pub descriptor: ConnectionDescriptor,
    pub session: Arc<dyn Session>,
}

pub struct DiscoveryScanner {
    transport: Arc<dyn Transport>,
    probe: Arc<dyn PortProbe>,
    port: u16,
    probe_timeout: Duration,
    concurrency: usize,
    settle: Duration,
}

impl DiscoveryScanner {
    pub fn new(
        transport: Arc<dyn Transport>,
        port: u16,
        probe_timeout: Duration,
        concurrency: usize,
        settle: Duration,
    ) -> Self {
        Self {
            transport,
            probe: Arc::new(TcpProbe),
            port,
            probe_timeout,
            concurrency: concurrency.max(1),
            settle,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        Self::new(
            transport,
            config.connection.tcp_port,
            config.timing.probe_timeout(),
            config.timing.probe_concurrency,
            config.timing.discovery_settle(),
        )
    }

    pub fn with_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Every host address of the /24 around `current`, excluding `current` itself.
    pub fn subnet_hosts(current: Ipv4Addr) -> Vec<Ipv4Addr> {
        let [a, b, c, _] = current.octets();
        (1..=254u8)
            .map(|d| Ipv4Addr::new(a, b, c, d))
            .filter(|ip| *ip != current)
            .collect()
    }

    /// Locate the node named `target` near `current`.
    pub async fn scan(
        &self,
        current: &ConnectionDescriptor,
        target: &str,
    ) -> Result<Discovered, DiscoveryError> {
        if current.kind != ConnectionKind::Tcp {
            return Err(DiscoveryError::NotTcp);
        }
        let (ip, port, explicit_port) = self.parse_address(&current.address)?;
        let [a, b, c, _] = ip.octets();
        let subnet = format!("{}.{}.{}.0/24", a, b, c);
        metrics::inc_discovery_scan();
        info!("Scanning {} for node '{}'", subnet, target);

        let mut responders = self.probe_hosts(Self::subnet_hosts(ip), port).await;
        if responders.is_empty() {
            warn!("No hosts on {} answered on port {}", subnet, port);
            return Err(DiscoveryError::NoResponders(subnet));
        }
        responders.sort();
        info!("{} host(s) answered on port {}", responders.len(), port);

        for host in responders {
            let address = if explicit_port {
                SocketAddrV4::new(host, port).to_string()
            } else {
                host.to_string()
            };
            let descriptor = ConnectionDescriptor::tcp(address);
            let session = match self.transport.connect(&descriptor).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("Candidate {} rejected: {}", descriptor, e);
                    continue;
                }
            };
            tokio::time::sleep(self.settle).await;
            let short = session.identity().map(|i| i.short_name);
            if short.as_deref() == Some(target) {
                info!("Found '{}' at {}", target, descriptor);
                return Ok(Discovered {
                    descriptor,
                    session,
                });
            }
            debug!(
                "Candidate {} is '{}', not '{}'",
                descriptor,
                short.unwrap_or_default(),
                target
            );
            if let Err(e) = session.close().await {
                debug!("Ignoring close error for {}: {}", descriptor, e);
            }
        }
        warn!("No node named '{}' on {}", target, subnet);
        Err(DiscoveryError::NoMatch(target.to_string()))
    }

    fn parse_address(&self, address: &str) -> Result<(Ipv4Addr, u16, bool), DiscoveryError> {
        if let Ok(sa) = address.parse::<SocketAddrV4>() {
            return Ok((*sa.ip(), sa.port(), true));
        }
        address
            .parse::<Ipv4Addr>()
            .map(|ip| (ip, self.port, false))
            .map_err(|_| DiscoveryError::NotNumeric(address.to_string()))
    }

    async fn probe_hosts(&self, hosts: Vec<Ipv4Addr>, port: u16) -> Vec<Ipv4Addr> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let probes = hosts.into_iter().map(|ip| {
            let permits = permits.clone();
            let probe = self.probe.clone();
            let wait = self.probe_timeout;
            async move {
                let _permit = permits.acquire_owned().await.ok()?;
                let addr = SocketAddr::V4(SocketAddrV4::new(ip, port));
                probe.probe(addr, wait).await.then_some(ip)
            }
        });
        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
