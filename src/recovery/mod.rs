//! # Recovery orchestration
//!
//! Sequences the steps that bring the link back after the node reboots or moves:
//!
//! ```text
//! planned:    SettlingBeforeRename -> AwaitingReboot -> Reconnecting -> [Discovering] -> Announcing -> Done
//! unplanned:                                            Reconnecting -> [Discovering] -> Announcing -> Done
//! ```
//!
//! Any step that cannot be resolved ends in `Failed` with a readable reason. At most one
//! task runs at a time: the slot is an atomic flag taken before the task starts and
//! released when it ends, so a second request is rejected instead of interleaving.
//! The shutdown sync is the exception: it waits for the running task to finish.
//! Progress is published on a `watch` channel for the console or any other observer.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::bot::alerts::AlertBroadcastGuard;
use crate::config::TimingConfig;
use crate::connection::{ConnectionManager, ConnectionState, DiscoveryScanner};
use crate::errors::{DiscoveryError, RecoveryError};
use crate::metrics;

pub mod watchdog;

pub use watchdog::{Watchdog, WatchdogVerdict};

/// One recovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTask {
    pub target_short_name: String,
    /// Planned tasks rename the node first; unplanned ones only re-acquire it.
    pub planned: bool,
}

impl RecoveryTask {
    pub fn planned(target: impl Into<String>) -> Self {
        Self {
            target_short_name: target.into(),
            planned: true,
        }
    }

    pub fn unplanned(target: impl Into<String>) -> Self {
        Self {
            target_short_name: target.into(),
            planned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPhase {
    Idle,
    SettlingBeforeRename,
    AwaitingReboot,
    Reconnecting,
    Discovering,
    Announcing,
    Done,
    Failed(String),
}

impl RecoveryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryPhase::Done | RecoveryPhase::Failed(_))
    }
}

/// Phase plus the line shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStatus {
    pub phase: RecoveryPhase,
    pub text: String,
}

impl RecoveryStatus {
    fn idle() -> Self {
        Self {
            phase: RecoveryPhase::Idle,
            text: "Idle".to_string(),
        }
    }
}

/// Holds the single recovery slot until dropped.
struct SlotGuard {
    in_flight: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

pub struct RecoveryOrchestrator {
    conn: Arc<ConnectionManager>,
    scanner: Arc<DiscoveryScanner>,
    guard: Arc<AlertBroadcastGuard>,
    settle: Duration,
    reboot_wait: Duration,
    shutdown_buffer: Duration,
    in_flight: Arc<AtomicBool>,
    released: Arc<Notify>,
    status: watch::Sender<RecoveryStatus>,
}

impl RecoveryOrchestrator {
    pub fn new(
        conn: Arc<ConnectionManager>,
        scanner: Arc<DiscoveryScanner>,
        guard: Arc<AlertBroadcastGuard>,
        timing: &TimingConfig,
    ) -> Self {
        let (status, _) = watch::channel(RecoveryStatus::idle());
        Self {
            conn,
            scanner,
            guard,
            settle: timing.settle(),
            reboot_wait: timing.reboot_wait(),
            shutdown_buffer: timing.shutdown_buffer(),
            in_flight: Arc::new(AtomicBool::new(false)),
            released: Arc::new(Notify::new()),
            status,
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RecoveryStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RecoveryStatus> {
        self.status.subscribe()
    }

    fn claim(&self) -> Option<SlotGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(SlotGuard {
            in_flight: self.in_flight.clone(),
            released: self.released.clone(),
        })
    }

    fn try_begin(&self) -> Result<SlotGuard, RecoveryError> {
        self.claim().ok_or_else(|| {
            metrics::inc_recovery_rejected();
            RecoveryError::AlreadyRunning
        })
    }

    /// Take the slot, waiting for a running task to release it.
    async fn begin_when_free(&self) -> SlotGuard {
        let mut logged = false;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before the claim so a release in between is not missed
            released.as_mut().enable();
            if let Some(slot) = self.claim() {
                return slot;
            }
            if !logged {
                info!("Waiting for running recovery before offline sync");
                logged = true;
            }
            released.await;
        }
    }

    /// Run `task` to completion on the current task.
    pub async fn run(&self, task: RecoveryTask) -> Result<RecoveryPhase, RecoveryError> {
        let slot = self.try_begin()?;
        Ok(self.execute(task, slot).await)
    }

    /// Claim the slot now and run `task` in the background.
    pub fn spawn(
        self: &Arc<Self>,
        task: RecoveryTask,
    ) -> Result<JoinHandle<RecoveryPhase>, RecoveryError> {
        let slot = self.try_begin()?;
        let this = self.clone();
        Ok(tokio::spawn(async move { this.execute(task, slot).await }))
    }

    fn publish(&self, phase: RecoveryPhase, text: impl Into<String>) {
        let text = text.into();
        debug!("recovery: {:?} ({})", phase, text);
        self.status.send_replace(RecoveryStatus { phase, text });
    }

    fn fail(&self, reason: impl Into<String>) -> RecoveryPhase {
        let reason = reason.into();
        error!("Recovery failed: {}", reason);
        metrics::inc_recovery_failed();
        let phase = RecoveryPhase::Failed(reason.clone());
        self.publish(phase.clone(), reason);
        phase
    }

    async fn execute(&self, task: RecoveryTask, _slot: SlotGuard) -> RecoveryPhase {
        metrics::inc_recovery_started();
        let target = task.target_short_name.as_str();
        info!(
            "Starting {} recovery for '{}'",
            if task.planned { "planned" } else { "unplanned" },
            target
        );

        if task.planned {
            let current = self.conn.identity().map(|i| i.short_name);
            if current.as_deref() == Some(target) {
                info!("Node already named '{}'; skipping rename", target);
            } else {
                self.publish(
                    RecoveryPhase::SettlingBeforeRename,
                    format!("Syncing name to {}...", target),
                );
                tokio::time::sleep(self.settle).await;
                if let Err(e) = self.conn.set_identity(Some(target), None).await {
                    return self.fail(format!("Rename to {} failed: {}", target, e));
                }
                info!(
                    "Node rebooting for name change to '{}'; waiting {}s",
                    target,
                    self.reboot_wait.as_secs()
                );
                self.publish(
                    RecoveryPhase::AwaitingReboot,
                    format!("Rebooting to {} ({}s)...", target, self.reboot_wait.as_secs()),
                );
                tokio::time::sleep(self.reboot_wait).await;
            }
        }

        let discovered = match self.reacquire(target).await {
            Ok(d) => d,
            Err(reason) => {
                self.conn.set_state(ConnectionState::Failed);
                return self.fail(reason);
            }
        };

        self.publish(RecoveryPhase::Announcing, format!("Announcing {}...", target));
        let announced = self.conn.announce_identity().await;
        self.guard.mark_announced();
        match announced {
            Ok(()) => {
                let how = match (discovered, self.conn.descriptor()) {
                    (true, _) => "ADAPTIVE".to_string(),
                    (false, Some(d)) => d.kind.to_string(),
                    (false, None) => "?".to_string(),
                };
                metrics::inc_recovery_done();
                info!("Recovery complete; '{}' announced", target);
                self.publish(RecoveryPhase::Done, format!("Connected ({}) - Sync OK", how));
                RecoveryPhase::Done
            }
            Err(e) if e.is_broken_pipe() => {
                debug!("Peer dropped during announce: {}", e);
                self.fail("Announce interrupted (link dropped)")
            }
            Err(e) => self.fail(format!("Announce failed: {}", e)),
        }
    }

    /// Reconnect to the last descriptor, falling back to a subnet scan.
    /// `Ok(true)` means the node was found by discovery.
    async fn reacquire(&self, target: &str) -> Result<bool, String> {
        self.publish(RecoveryPhase::Reconnecting, "Reconnecting...");
        self.conn.set_state(ConnectionState::Reconnecting);
        if self.conn.reconnect().await.is_ok() {
            return Ok(false);
        }

        let Some(last) = self.conn.descriptor() else {
            return Err("Reconnect Failed (no previous connection)".to_string());
        };
        warn!("Reconnect failed; searching network for '{}'", target);
        self.publish(
            RecoveryPhase::Discovering,
            format!("Searching network for {}...", target),
        );
        self.conn.set_state(ConnectionState::Discovering);
        match self.scanner.scan(&last, target).await {
            Ok(found) => {
                self.conn.adopt(found.descriptor, found.session).await;
                Ok(true)
            }
            Err(e @ (DiscoveryError::NotTcp | DiscoveryError::NotNumeric(_))) => {
                Err(format!("Reconnect Failed ({})", e))
            }
            Err(e) => {
                warn!("Discovery failed: {}", e);
                Err("Reconnect Failed (Not Found)".to_string())
            }
        }
    }

    /// Shutdown rename to `offline_name`. With `ping`, also wait for the reboot,
    /// re-acquire the node and announce. A running recovery is allowed to finish
    /// first. Never fails; problems are logged and the sequence simply stops.
    pub async fn go_offline(&self, offline_name: &str, ping: bool) {
        let _slot = self.begin_when_free().await;
        if !self.conn.is_connected() {
            debug!("Not connected; skipping offline sync");
            return;
        }
        let current = self.conn.identity().map(|i| i.short_name);
        if current.as_deref() == Some(offline_name) {
            info!("Node already named '{}'; skipping final sync", offline_name);
            return;
        }

        info!("Updating short name to '{}' before exit", offline_name);
        tokio::time::sleep(self.settle).await;
        if let Err(e) = self.conn.set_identity(Some(offline_name), None).await {
            debug!("Offline rename failed (suppressed): {}", e);
            return;
        }
        if !ping {
            return;
        }

        info!(
            "Waiting {}s for node reboot before final announce",
            self.reboot_wait.as_secs()
        );
        tokio::time::sleep(self.reboot_wait).await;
        if let Err(reason) = self.reacquire(offline_name).await {
            debug!("Final re-acquire failed (suppressed): {}", reason);
            return;
        }
        if let Err(e) = self.conn.announce_identity().await {
            debug!("Final announce failed (suppressed): {}", e);
        }
        tokio::time::sleep(self.shutdown_buffer).await;
    }
}
