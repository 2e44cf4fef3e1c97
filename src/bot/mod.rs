//! # Station Bot Module
//!
//! Everything above the link layer: what the station does with the messages it
//! receives and the broadcasts it sends.
//!
//! ## Components
//!
//! - [`router`] - DM / command-channel routing policy and dispatch
//! - [`commands`] - Command parsing (`help`, `/status`, `weather`, `WX1`-`WX5`) and replies
//! - [`alerts`] - Alert de-duplication, pacing and post-announce cool-down
//! - [`weather`] - Weather provider contract and the Open-Meteo / NWS client
//! - [`server`] - [`Station`], which wires the components together and owns the run loop
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Station        │ ← lifecycle, watchdog, alert poller, shutdown sync
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  MessageRouter  │ ← one inbound message at a time
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Commands /     │ ← reply text; channel sends pass the broadcast guard
//! │  Alert guard    │
//! └─────────────────┘
//! ```
//!
//! ## Usage
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
//!     let mut station = Station::new(config, transport, None);
//!     station.connect(None).await?;
//!     station.run().await
//! }
//! ```

pub mod alerts;
pub mod commands;
pub mod router;
pub mod server;
pub mod weather;

pub use alerts::{AlertBroadcastGuard, AlertRecord};
pub use router::{Dispatch, MessageRouter, Route, RoutingPolicy};
pub use server::Station;
pub use weather::{Location, WeatherProvider};
