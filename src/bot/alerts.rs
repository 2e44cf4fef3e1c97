//! Outbound broadcast guard and the weather alert poller.
//!
//! [`AlertBroadcastGuard`] applies three rules to channel broadcasts:
//!
//! * an alert id is broadcast at most once for the life of the process
//! * alerts from one polling pass are spaced by a fixed pacing delay
//! * nothing is broadcast within the cool-down window after an identity announce;
//!   such sends wait until the window has passed
//!
//! All waits are `tokio::time` sleeps on the caller's task (alert poller, deferred
//! reply task), never on the router loop.
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::weather::{Location, WeatherProvider};
use crate::config::TimingConfig;
use crate::connection::ConnectionManager;
use crate::errors::TransportError;
use crate::metrics;
use crate::scheduler::{self, TaskHandle};

/// An active weather alert as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub event: String,
    pub headline: String,
    pub severity: String,
}

impl AlertRecord {
    /// Channel text, led by the bell character so clients sound a notification.
    pub fn broadcast_text(&self) -> String {
        format!(
            "\u{7}⚠️ WX ALERT: {} - {}\n{}",
            self.event, self.severity, self.headline
        )
    }
}

pub fn test_alert_text(message: &str) -> String {
    format!("\u{7}⚠️ WX TEST: {}", message)
}

pub struct AlertBroadcastGuard {
    conn: Arc<ConnectionManager>,
    seen: Mutex<HashSet<String>>,
    pacing: Duration,
    cooldown: Duration,
    last_announce: Mutex<Option<Instant>>,
    /// Serialises polling passes so pacing holds across overlapping callers.
    pass: tokio::sync::Mutex<()>,
}

impl AlertBroadcastGuard {
    pub fn new(conn: Arc<ConnectionManager>, pacing: Duration, cooldown: Duration) -> Self {
        Self {
            conn,
            seen: Mutex::new(HashSet::new()),
            pacing,
            cooldown,
            last_announce: Mutex::new(None),
            pass: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_timing(conn: Arc<ConnectionManager>, timing: &TimingConfig) -> Self {
        Self::new(conn, timing.alert_pacing(), timing.announce_cooldown())
    }

    /// Record `id` as seen. Returns false if it was already claimed.
    pub fn claim(&self, id: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(id.to_string()),
        }
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Start the post-announce cool-down window.
    pub fn mark_announced(&self) {
        if let Ok(mut last) = self.last_announce.lock() {
            *last = Some(Instant::now());
        }
    }

    /// Time left in the cool-down window, if one is active.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let last = (*self.last_announce.lock().ok()?)?;
        let until = last + self.cooldown;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    pub async fn wait_for_cooldown(&self) {
        // Loop: another announce may re-arm the window while we sleep
        while let Some(left) = self.cooldown_remaining() {
            debug!("Broadcast held {}ms for announce cool-down", left.as_millis());
            tokio::time::sleep(left).await;
        }
    }

    /// Broadcast `text` on `channel` once any cool-down has passed.
    pub async fn broadcast(&self, text: &str, channel: u32) -> Result<(), TransportError> {
        self.wait_for_cooldown().await;
        self.conn.send_broadcast(text, channel).await
    }

    /// Broadcast every not-yet-seen alert, spaced by the pacing delay.
    /// Returns how many were sent.
    pub async fn broadcast_alerts(&self, alerts: &[AlertRecord], channel: u32) -> usize {
        let _pass = self.pass.lock().await;
        let mut attempted = 0;
        let mut sent = 0;
        for alert in alerts {
            if !self.claim(&alert.id) {
                continue;
            }
            // Failed sends count toward pacing
            if attempted > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            attempted += 1;
            info!("Broadcasting alert: {}", alert.event);
            match self.broadcast(&alert.broadcast_text(), channel).await {
                Ok(()) => {
                    metrics::inc_alerts_broadcast();
                    sent += 1;
                }
                Err(e) => warn!("Alert broadcast for '{}' failed: {}", alert.event, e),
            }
        }
        sent
    }
}

/// One poll: fetch active alerts and hand new ones to the guard.
pub async fn poll_alerts_once(
    guard: &AlertBroadcastGuard,
    conn: &ConnectionManager,
    weather: &dyn WeatherProvider,
    location: Location,
    channel: u32,
) -> usize {
    if !conn.is_connected() {
        debug!("Skipping alert poll; not connected");
        return 0;
    }
    info!("Checking for weather alerts...");
    match weather.active_alerts(location).await {
        Ok(alerts) => guard.broadcast_alerts(&alerts, channel).await,
        Err(e) => {
            warn!("Alert fetch failed: {}", e);
            0
        }
    }
}

/// Poll for alerts every `period`, first after `initial_delay`.
pub fn spawn_alert_poller(
    guard: Arc<AlertBroadcastGuard>,
    conn: Arc<ConnectionManager>,
    weather: Arc<dyn WeatherProvider>,
    location: Location,
    channel: u32,
    initial_delay: Duration,
    period: Duration,
) -> TaskHandle {
    scheduler::spawn_periodic("alert-poller", initial_delay, period, move || {
        let guard = guard.clone();
        let conn = conn.clone();
        let weather = weather.clone();
        async move {
            poll_alerts_once(&guard, &conn, weather.as_ref(), location, channel).await;
        }
    })
}
