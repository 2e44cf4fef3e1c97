//! Station lifecycle: builds the connection, recovery and routing components from a
//! [`Config`], runs the inbound loop until Ctrl-C, and performs the shutdown sync.
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::sync::Arc;

use super::alerts::{self, test_alert_text, AlertBroadcastGuard};
use super::commands::CommandProcessor;
use super::router::{MessageRouter, RoutingPolicy};
use super::weather::{Location, WeatherProvider};
use crate::config::Config;
use crate::connection::{ConnectionDescriptor, ConnectionManager, ConnectionState, DiscoveryScanner};
use crate::errors::TransportError;
use crate::meshtastic::Transport;
use crate::metrics;
use crate::recovery::{RecoveryOrchestrator, RecoveryTask, Watchdog};
use crate::scheduler::TaskHandle;

pub struct Station {
    config: Config,
    config_path: Option<String>,
    conn: Arc<ConnectionManager>,
    guard: Arc<AlertBroadcastGuard>,
    recovery: Arc<RecoveryOrchestrator>,
    router: Arc<MessageRouter>,
    weather: Option<Arc<dyn WeatherProvider>>,
}

impl Station {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        weather: Option<Arc<dyn WeatherProvider>>,
    ) -> Self {
        Self::with_scanner(
            config.clone(),
            transport.clone(),
            weather,
            DiscoveryScanner::from_config(transport, &config),
        )
    }

    /// Like [`Station::new`] with a caller-supplied discovery scanner.
    pub fn with_scanner(
        config: Config,
        transport: Arc<dyn Transport>,
        weather: Option<Arc<dyn WeatherProvider>>,
        scanner: DiscoveryScanner,
    ) -> Self {
        for warning in config.warnings() {
            warn!("Config: {}", warning);
        }
        let conn = Arc::new(ConnectionManager::new(transport));
        let guard = Arc::new(AlertBroadcastGuard::from_timing(conn.clone(), &config.timing));
        let recovery = Arc::new(RecoveryOrchestrator::new(
            conn.clone(),
            Arc::new(scanner),
            guard.clone(),
            &config.timing,
        ));
        let router = Arc::new(MessageRouter::new(
            conn.clone(),
            guard.clone(),
            RoutingPolicy::from_config(&config.routing),
            CommandProcessor::from_config(&config, weather.clone()),
        ));
        Self {
            config,
            config_path: None,
            conn,
            guard,
            recovery,
            router,
            weather,
        }
    }

    /// Persist the descriptor to `path` after each successful connect
    /// (when `remember_last` is on).
    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    pub fn guard(&self) -> &Arc<AlertBroadcastGuard> {
        &self.guard
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Connect using `over` or the configured descriptor, then start the
    /// startup name sync if enabled.
    pub async fn connect(&mut self, over: Option<ConnectionDescriptor>) -> Result<()> {
        let descriptor = over
            .or_else(|| self.config.descriptor())
            .ok_or_else(|| anyhow!("No usable connection configured"))?;
        self.conn
            .connect(descriptor.clone())
            .await
            .map_err(|e| anyhow!("Connect to {} failed: {}", descriptor, e))?;
        self.remember(&descriptor).await;
        self.startup_sync();
        Ok(())
    }

    async fn remember(&mut self, descriptor: &ConnectionDescriptor) {
        if !self.config.connection.remember_last {
            return;
        }
        let Some(path) = self.config_path.clone() else {
            return;
        };
        if self.config.descriptor().as_ref() == Some(descriptor) {
            return;
        }
        match self.config.remember_connection(&path, descriptor).await {
            Ok(()) => info!("Saved {} to {}", descriptor, path),
            Err(e) => warn!("Could not save connection to {}: {}", path, e),
        }
    }

    fn startup_sync(&self) {
        if !self.config.features.sync_shortname {
            return;
        }
        let name = self.config.features.online_short_name.clone();
        if let Err(e) = self.recovery.spawn(RecoveryTask::planned(name)) {
            warn!("Startup name sync not started: {}", e);
        }
    }

    /// Run until Ctrl-C or until the inbound feed closes, then shut down.
    pub async fn run(&mut self) -> Result<()> {
        let mut inbound = self
            .conn
            .take_inbound()
            .ok_or_else(|| anyhow!("Inbound feed already taken"))?;

        let mut tasks = vec![self.spawn_watchdog()];
        if let Some(poller) = self.spawn_alert_poller() {
            tasks.push(poller);
        }
        let persister = self.spawn_descriptor_persister();

        info!("Station running");
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        self.router.handle(msg).await;
                    }
                    None => {
                        warn!("Inbound feed closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        for task in &tasks {
            task.cancel();
        }
        if let Some(p) = persister {
            p.abort();
        }
        self.shutdown().await;
        Ok(())
    }

    fn spawn_watchdog(&self) -> TaskHandle {
        let dog = Arc::new(Watchdog::new(
            self.conn.clone(),
            self.recovery.clone(),
            self.config.features.online_short_name.clone(),
        ));
        dog.spawn(self.config.timing.watchdog_interval())
    }

    fn spawn_alert_poller(&self) -> Option<TaskHandle> {
        let w = &self.config.weather;
        if !w.alerts_enabled {
            return None;
        }
        let Some(provider) = self.weather.clone() else {
            warn!("Weather alerts enabled but no weather provider is available");
            return None;
        };
        Some(alerts::spawn_alert_poller(
            self.guard.clone(),
            self.conn.clone(),
            provider,
            Location::new(w.latitude, w.longitude),
            self.config.routing.alert_channel,
            std::time::Duration::from_secs(w.alert_initial_delay_secs),
            std::time::Duration::from_secs(w.alert_poll_interval_secs.max(1)),
        ))
    }

    /// Save descriptors adopted by recovery (e.g. a node found at a new address).
    fn spawn_descriptor_persister(&self) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.connection.remember_last {
            return None;
        }
        let path = self.config_path.clone()?;
        let mut config = self.config.clone();
        let conn = self.conn.clone();
        let mut states = conn.subscribe_state();
        Some(tokio::spawn(async move {
            while states.changed().await.is_ok() {
                if *states.borrow_and_update() != ConnectionState::Connected {
                    continue;
                }
                let Some(current) = conn.descriptor() else {
                    continue;
                };
                if config.descriptor().as_ref() == Some(&current) {
                    continue;
                }
                match config.remember_connection(&path, &current).await {
                    Ok(()) => info!("Saved {} to {}", current, path),
                    Err(e) => warn!("Could not save connection to {}: {}", path, e),
                }
            }
        }))
    }

    /// Broadcast a test alert on the alert channel.
    pub async fn send_test_alert(&self, message: &str) -> Result<(), TransportError> {
        self.guard
            .broadcast(&test_alert_text(message), self.config.routing.alert_channel)
            .await
    }

    /// Summary printed by `meshupgrade probe`.
    pub fn probe_summary(&self) -> serde_json::Value {
        let connected = self.conn.is_connected();
        let identity = self.conn.identity();
        serde_json::json!({
            "status": if connected { "ok" } else { "disconnected" },
            "connection": self.conn.descriptor().map(|d| d.to_string()),
            "short_name": identity.as_ref().map(|i| i.short_name.clone()),
            "long_name": identity.as_ref().map(|i| i.long_name.clone()),
            "channels": self.conn.channels(),
            "node_count": self.conn.node_count(),
        })
    }

    /// Offline name sync (when enabled), then close the link. Never fails.
    pub async fn shutdown(&self) {
        info!("Shutting down station...");
        let f = &self.config.features;
        if f.sync_shortname {
            self.recovery
                .go_offline(&f.offline_short_name, f.sync_ping)
                .await;
        }
        self.conn.close().await;
        match serde_json::to_string(&metrics::snapshot()) {
            Ok(json) => info!("Final counters: {}", json),
            Err(e) => debug!("Could not serialise counters: {}", e),
        }
        info!("Station shutdown complete");
    }
}
