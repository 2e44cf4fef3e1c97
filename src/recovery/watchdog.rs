//! Periodic liveness check that starts an unplanned recovery after an unexpected drop.
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use super::{RecoveryOrchestrator, RecoveryTask};
use crate::connection::ConnectionManager;
use crate::scheduler::{self, TaskHandle};

/// Result of one watchdog pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// No connect has ever succeeded; nothing to recover.
    NeverConnected,
    Healthy,
    RecoveryInFlight,
    /// An unplanned recovery was started.
    Triggered,
}

pub struct Watchdog {
    conn: Arc<ConnectionManager>,
    recovery: Arc<RecoveryOrchestrator>,
    fallback_short_name: String,
}

impl Watchdog {
    /// `fallback_short_name` is used when the node's name was never learned.
    pub fn new(
        conn: Arc<ConnectionManager>,
        recovery: Arc<RecoveryOrchestrator>,
        fallback_short_name: impl Into<String>,
    ) -> Self {
        Self {
            conn,
            recovery,
            fallback_short_name: fallback_short_name.into(),
        }
    }

    pub fn check_once(&self) -> WatchdogVerdict {
        if !self.conn.was_connected() {
            return WatchdogVerdict::NeverConnected;
        }
        if self.conn.is_connected() {
            return WatchdogVerdict::Healthy;
        }
        if self.recovery.is_running() {
            debug!("watchdog: link down but recovery already running");
            return WatchdogVerdict::RecoveryInFlight;
        }
        let target = self
            .conn
            .last_short_name()
            .unwrap_or_else(|| self.fallback_short_name.clone());
        warn!("Connection watchdog detected unexpected drop; starting recovery for '{}'", target);
        match self.recovery.spawn(RecoveryTask::unplanned(target)) {
            Ok(_) => WatchdogVerdict::Triggered,
            Err(_) => WatchdogVerdict::RecoveryInFlight,
        }
    }

    /// Run `check_once` every `period` until the handle is cancelled.
    pub fn spawn(self: Arc<Self>, period: Duration) -> TaskHandle {
        scheduler::spawn_periodic("watchdog", period, period, move || {
            let dog = self.clone();
            async move {
                dog.check_once();
            }
        })
    }
}
