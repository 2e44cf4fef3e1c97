//! Process-wide counters for the link, router and recovery paths.
//! Counters are plain atomics; `snapshot()` is what `probe` and the shutdown log print.
use std::sync::atomic::{AtomicU64, Ordering};

static DM_SENT: AtomicU64 = AtomicU64::new(0);
static BROADCAST_SENT: AtomicU64 = AtomicU64::new(0);
static SEND_FAILED: AtomicU64 = AtomicU64::new(0);
static TRUNCATED: AtomicU64 = AtomicU64::new(0);
static INBOUND_DROPPED: AtomicU64 = AtomicU64::new(0);
static ALERTS_BROADCAST: AtomicU64 = AtomicU64::new(0);
static RECOVERIES_STARTED: AtomicU64 = AtomicU64::new(0);
static RECOVERIES_DONE: AtomicU64 = AtomicU64::new(0);
static RECOVERIES_FAILED: AtomicU64 = AtomicU64::new(0);
static RECOVERIES_REJECTED: AtomicU64 = AtomicU64::new(0);
static DISCOVERY_SCANS: AtomicU64 = AtomicU64::new(0);

pub fn inc_dm_sent() {
    DM_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_broadcast_sent() {
    BROADCAST_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failed() {
    SEND_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_truncated() {
    TRUNCATED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_inbound_dropped() {
    INBOUND_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_alerts_broadcast() {
    ALERTS_BROADCAST.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_recovery_started() {
    RECOVERIES_STARTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_recovery_done() {
    RECOVERIES_DONE.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_recovery_failed() {
    RECOVERIES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_recovery_rejected() {
    RECOVERIES_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_discovery_scan() {
    DISCOVERY_SCANS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct Snapshot {
    pub dm_sent: u64,
    pub broadcast_sent: u64,
    pub send_failed: u64,
    pub truncated: u64,
    pub inbound_dropped: u64,
    pub alerts_broadcast: u64,
    pub recoveries_started: u64,
    pub recoveries_done: u64,
    pub recoveries_failed: u64,
    pub recoveries_rejected: u64,
    pub discovery_scans: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        dm_sent: DM_SENT.load(Ordering::Relaxed),
        broadcast_sent: BROADCAST_SENT.load(Ordering::Relaxed),
        send_failed: SEND_FAILED.load(Ordering::Relaxed),
        truncated: TRUNCATED.load(Ordering::Relaxed),
        inbound_dropped: INBOUND_DROPPED.load(Ordering::Relaxed),
        alerts_broadcast: ALERTS_BROADCAST.load(Ordering::Relaxed),
        recoveries_started: RECOVERIES_STARTED.load(Ordering::Relaxed),
        recoveries_done: RECOVERIES_DONE.load(Ordering::Relaxed),
        recoveries_failed: RECOVERIES_FAILED.load(Ordering::Relaxed),
        recoveries_rejected: RECOVERIES_REJECTED.load(Ordering::Relaxed),
        discovery_scans: DISCOVERY_SCANS.load(Ordering::Relaxed),
    }
}
