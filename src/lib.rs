//! # MeshUpGrade - Control Link for a Meshtastic Node
//!
//! MeshUpGrade keeps a long-running control link to one Meshtastic node and runs a
//! small command bot and weather alert broadcaster on top of it.
//!
//! ## Features
//!
//! - **TCP or serial link**: Meshtastic stream API over `host:4403` or a USB serial port.
//! - **Recovery**: planned renames (settle, rename, reboot wait, reconnect, announce) and
//!   unplanned reconnects triggered by a watchdog, with at most one recovery in flight.
//! - **Discovery**: when the node's DHCP address changes, the /24 is scanned and the node
//!   is found again by its short name.
//! - **Command bot**: `help`, `/status`, `weather` and `WX1`-`WX5` by DM, or on a dedicated
//!   command channel.
//! - **Alert broadcasts**: each alert id is sent once, alerts are paced, and nothing is
//!   broadcast right after an identity announce.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshupgrade::bot::Station;
//! use meshupgrade::config::Config;
//! use meshupgrade::meshtastic::StreamTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let transport = Arc::new(StreamTransport::from_config(&config));
//!     let mut station = Station::new(config, transport, None).with_config_path("config.toml");
//!     station.connect(None).await?;
//!     station.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - Transport/session contract, stream framing and the TCP/serial client
//! - [`connection`] - Connection manager, descriptors, outbound truncation and discovery
//! - [`recovery`] - Recovery orchestrator and connection watchdog
//! - [`bot`] - Routing, commands, alert guard, weather and the station run loop
//! - [`config`] - Configuration model, defaults and warnings
//! - [`scheduler`] - Delayed and periodic background tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Station       │ ← Routing, alerts, lifecycle
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Connection    │ ← Single active session, recovery, discovery
//! │   Manager       │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Meshtastic    │ ← Stream API over TCP or serial
//! │   Transport     │
//! └─────────────────┘
//! ```

pub mod bot;
pub mod config;
pub mod connection;
pub mod errors;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod recovery;
pub mod scheduler;
