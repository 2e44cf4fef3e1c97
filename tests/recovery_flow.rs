//! Planned and unplanned recovery against the fake network, on a paused clock.
mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

use common::{FakeNetwork, Rig};
use meshupgrade::connection::{ConnectionDescriptor, ConnectionState};
use meshupgrade::errors::RecoveryError;
use meshupgrade::recovery::{RecoveryPhase, RecoveryTask};

async fn rig_at(address: &str, name: &str) -> Rig {
    let net = FakeNetwork::new();
    net.add_node(address, name);
    let rig = Rig::new(&net);
    rig.conn.connect_tcp(address).await.unwrap();
    rig
}

#[tokio::test(start_paused = true)]
async fn planned_rename_settles_reboots_and_announces() {
    let rig = rig_at("10.0.0.5", "OFF").await;
    rig.net.reboot_on_rename(true);

    let start = Instant::now();
    let phase = rig.recovery.run(RecoveryTask::planned("ON")).await.unwrap();

    assert_eq!(phase, RecoveryPhase::Done);
    assert!(start.elapsed() >= rig.config.timing.settle() + rig.config.timing.reboot_wait());
    assert_eq!(rig.net.renames(), vec!["ON".to_string()]);
    assert_eq!(rig.net.name_at("10.0.0.5").as_deref(), Some("ON"));
    assert!(rig.conn.is_connected());
    assert_eq!(rig.net.latest().announces.load(Ordering::SeqCst), 1);
    assert_eq!(rig.recovery.status().text, "Connected (TCP) - Sync OK");
    assert!(!rig.recovery.is_running());
}

#[tokio::test(start_paused = true)]
async fn rename_is_skipped_when_name_already_matches() {
    let rig = rig_at("10.0.0.5", "ON").await;

    let start = Instant::now();
    let phase = rig.recovery.run(RecoveryTask::planned("ON")).await.unwrap();

    assert_eq!(phase, RecoveryPhase::Done);
    assert!(rig.net.renames().is_empty());
    assert!(start.elapsed() < rig.config.timing.reboot_wait());
}

#[tokio::test(start_paused = true)]
async fn second_task_is_rejected_while_one_runs() {
    let rig = rig_at("10.0.0.5", "OFF").await;

    let handle = rig.recovery.spawn(RecoveryTask::planned("ON")).unwrap();
    assert!(rig.recovery.is_running());
    assert_eq!(
        rig.recovery.run(RecoveryTask::unplanned("ON")).await,
        Err(RecoveryError::AlreadyRunning)
    );
    assert!(rig.recovery.spawn(RecoveryTask::unplanned("ON")).is_err());

    assert_eq!(handle.await.unwrap(), RecoveryPhase::Done);
    assert!(!rig.recovery.is_running());
    // Exactly one rename reached the node
    assert_eq!(rig.net.renames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn moved_node_is_found_by_discovery() {
    let rig = rig_at("10.0.0.5", "ON").await;
    rig.net.latest().kill();
    rig.net.remove_node("10.0.0.5");
    rig.net.add_node("10.0.0.9", "ON");

    let phase = rig.recovery.run(RecoveryTask::unplanned("ON")).await.unwrap();

    assert_eq!(phase, RecoveryPhase::Done);
    assert_eq!(rig.conn.descriptor(), Some(ConnectionDescriptor::tcp("10.0.0.9")));
    assert_eq!(rig.conn.state(), ConnectionState::Connected);
    assert_eq!(rig.recovery.status().text, "Connected (ADAPTIVE) - Sync OK");
    assert_eq!(rig.net.session("10.0.0.9").announces.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn vanished_node_ends_in_failed() {
    let rig = rig_at("10.0.0.5", "ON").await;
    rig.net.latest().kill();
    rig.net.remove_node("10.0.0.5");

    let phase = rig.recovery.run(RecoveryTask::unplanned("ON")).await.unwrap();

    assert_eq!(
        phase,
        RecoveryPhase::Failed("Reconnect Failed (Not Found)".to_string())
    );
    assert_eq!(rig.conn.state(), ConnectionState::Failed);
    assert!(!rig.conn.is_connected());
    assert!(!rig.recovery.is_running());
}

#[tokio::test(start_paused = true)]
async fn serial_link_failure_does_not_scan() {
    let net = FakeNetwork::new();
    net.add_node("/dev/ttyUSB0", "ON");
    let rig = Rig::new(&net);
    rig.conn.connect_serial(Some("/dev/ttyUSB0")).await.unwrap();
    net.latest().kill();
    net.remove_node("/dev/ttyUSB0");

    let phase = rig.recovery.run(RecoveryTask::unplanned("ON")).await.unwrap();

    assert_eq!(
        phase,
        RecoveryPhase::Failed("Reconnect Failed (last connection was not TCP)".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn broken_pipe_during_announce_fails_quietly_and_arms_cooldown() {
    let rig = rig_at("10.0.0.5", "ON").await;
    rig.net.break_announces(true);

    let phase = rig.recovery.run(RecoveryTask::unplanned("ON")).await.unwrap();

    assert_eq!(
        phase,
        RecoveryPhase::Failed("Announce interrupted (link dropped)".to_string())
    );
    assert!(rig.guard.cooldown_remaining().is_some());
}

#[tokio::test(start_paused = true)]
async fn status_observers_see_progress() {
    let rig = rig_at("10.0.0.5", "OFF").await;
    let mut status = rig.recovery.subscribe_status();

    let handle = rig.recovery.spawn(RecoveryTask::planned("ON")).unwrap();
    let mut seen = Vec::new();
    while status.changed().await.is_ok() {
        let phase = status.borrow_and_update().phase.clone();
        let done = phase.is_terminal();
        seen.push(phase);
        if done {
            break;
        }
    }
    handle.await.unwrap();

    assert_eq!(seen.first(), Some(&RecoveryPhase::SettlingBeforeRename));
    assert!(seen.contains(&RecoveryPhase::AwaitingReboot));
    assert_eq!(seen.last(), Some(&RecoveryPhase::Done));
}

#[tokio::test(start_paused = true)]
async fn go_offline_renames_and_pings() {
    let rig = rig_at("10.0.0.5", "ON").await;
    rig.net.reboot_on_rename(true);

    let start = Instant::now();
    rig.recovery.go_offline("OFF", true).await;

    assert_eq!(rig.net.renames(), vec!["OFF".to_string()]);
    assert_eq!(rig.net.latest().announces.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= rig.config.timing.reboot_wait() + Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn go_offline_waits_for_running_recovery() {
    let rig = rig_at("10.0.0.5", "OFF").await;
    rig.net.reboot_on_rename(true);
    let startup = rig.recovery.spawn(RecoveryTask::planned("ON")).unwrap();
    tokio::time::sleep(rig.config.timing.settle() + Duration::from_secs(1)).await;
    assert!(!rig.conn.is_connected());

    rig.recovery.go_offline("OFF", false).await;

    assert_eq!(startup.await.unwrap(), RecoveryPhase::Done);
    assert_eq!(rig.net.renames(), vec!["ON".to_string(), "OFF".to_string()]);
    assert_eq!(rig.net.name_at("10.0.0.5").as_deref(), Some("OFF"));
    assert!(!rig.recovery.is_running());
}

#[tokio::test(start_paused = true)]
async fn go_offline_skips_when_already_named() {
    let rig = rig_at("10.0.0.5", "OFF").await;
    rig.recovery.go_offline("OFF", true).await;
    assert!(rig.net.renames().is_empty());
    assert_eq!(rig.net.connect_count(), 1);
}
