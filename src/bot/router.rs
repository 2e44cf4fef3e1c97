//! Inbound message routing.
//!
//! Direct messages are always handled and answered by DM. Broadcasts are handled only
//! when they arrive on the configured command channel, and are answered by broadcast on
//! that same channel; every other broadcast is logged and dropped.
//!
//! A channel reply that lands inside the announce cool-down is deferred, never awaited,
//! so replies are not strictly ordered per sender: a DM answered during the window goes
//! out before the held channel reply, even when the DM arrived later.
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::alerts::AlertBroadcastGuard;
use super::commands::CommandProcessor;
use crate::config::RoutingConfig;
use crate::connection::ConnectionManager;
use crate::logutil::escape_log;
use crate::meshtastic::InboundMessage;
use crate::scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub command_channel: Option<u32>,
    pub alert_channel: u32,
}

impl RoutingPolicy {
    pub fn from_config(routing: &RoutingConfig) -> Self {
        Self {
            command_channel: routing.command_channel,
            alert_channel: routing.alert_channel,
        }
    }

    pub fn classify(&self, msg: &InboundMessage) -> Route {
        if !msg.is_broadcast {
            return Route::Direct;
        }
        match self.command_channel {
            Some(ch) if ch == msg.channel => Route::Channel(ch),
            _ => Route::Ignored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    /// Broadcast on the command channel; reply goes back to this channel.
    Channel(u32),
    Ignored,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Replied(Route),
    /// Channel reply handed to a background task until the announce cool-down ends.
    Deferred(u32),
    Dropped,
    SendFailed,
}

pub struct MessageRouter {
    conn: Arc<ConnectionManager>,
    guard: Arc<AlertBroadcastGuard>,
    policy: RoutingPolicy,
    commands: CommandProcessor,
}

impl MessageRouter {
    pub fn new(
        conn: Arc<ConnectionManager>,
        guard: Arc<AlertBroadcastGuard>,
        policy: RoutingPolicy,
        commands: CommandProcessor,
    ) -> Self {
        Self {
            conn,
            guard,
            policy,
            commands,
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    pub async fn handle(&self, msg: InboundMessage) -> Dispatch {
        info!(
            "Message from {} (ch {}{}): '{}'",
            msg.sender,
            msg.channel,
            if msg.is_broadcast { ", broadcast" } else { "" },
            escape_log(&msg.text)
        );
        let route = self.policy.classify(&msg);
        if route == Route::Ignored {
            debug!(
                "Dropping broadcast on channel {} (not the command channel)",
                msg.channel
            );
            return Dispatch::Dropped;
        }

        let position = self.conn.node_position(msg.sender);
        let reply = self
            .commands
            .respond(&msg.text, &msg.signal, position)
            .await;

        match route {
            Route::Direct => match self.conn.send_dm(&reply, msg.sender, msg.channel).await {
                Ok(()) => Dispatch::Replied(route),
                Err(_) => Dispatch::SendFailed,
            },
            Route::Channel(ch) => {
                if let Some(left) = self.guard.cooldown_remaining() {
                    let guard = self.guard.clone();
                    // Fire-and-forget; the guard re-checks the window before sending
                    scheduler::spawn_delayed("deferred-reply", left, async move {
                        if let Err(e) = guard.broadcast(&reply, ch).await {
                            warn!("Deferred channel reply failed: {}", e);
                        }
                    });
                    return Dispatch::Deferred(ch);
                }
                match self.guard.broadcast(&reply, ch).await {
                    Ok(()) => Dispatch::Replied(route),
                    Err(_) => Dispatch::SendFailed,
                }
            }
            Route::Ignored => Dispatch::Dropped,
        }
    }

    /// Handle messages in arrival order until the feed closes.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(msg) = inbound.recv().await {
            self.handle(msg).await;
        }
        debug!("Inbound feed closed; router stopping");
    }
}
