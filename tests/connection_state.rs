//! Connection state follows the session's liveness without waiting for the watchdog.
mod common;

use std::time::Duration;

use common::{FakeNetwork, Rig};
use meshupgrade::connection::ConnectionState;

#[tokio::test]
async fn dropped_link_reads_disconnected_right_away() {
    let net = FakeNetwork::new();
    net.add_node("10.0.0.5", "ON");
    let rig = Rig::new(&net);
    rig.conn.connect_tcp("10.0.0.5").await.unwrap();
    assert_eq!(rig.conn.state(), ConnectionState::Connected);

    net.latest().kill();

    assert!(!rig.conn.is_connected());
    assert_eq!(rig.conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn subscribers_see_the_drop() {
    let net = FakeNetwork::new();
    net.add_node("10.0.0.5", "ON");
    let rig = Rig::new(&net);
    rig.conn.connect_tcp("10.0.0.5").await.unwrap();
    let mut states = rig.conn.subscribe_state();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    net.latest().kill();

    let seen = tokio::time::timeout(
        Duration::from_secs(1),
        states.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await;
    assert!(seen.is_ok(), "state never left Connected");
}

#[tokio::test]
async fn replaced_session_dying_leaves_state_alone() {
    let net = FakeNetwork::new();
    net.add_node("10.0.0.5", "ON");
    net.add_node("10.0.0.9", "ON");
    let rig = Rig::new(&net);
    rig.conn.connect_tcp("10.0.0.5").await.unwrap();
    let old = net.session("10.0.0.5");

    rig.conn.connect_tcp("10.0.0.9").await.unwrap();
    // Replacing a session closes the old one, which drops its liveness
    assert!(old.is_closed());
    tokio::task::yield_now().await;

    assert_eq!(rig.conn.state(), ConnectionState::Connected);
    assert_eq!(*rig.conn.subscribe_state().borrow(), ConnectionState::Connected);
}
