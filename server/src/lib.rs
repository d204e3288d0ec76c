//! # Lock-step Relay Server
//!
//! This library provides the relay used by lock-step multiplayer sessions.
//! It admits players, gives each one a stable id, and forwards every per-step
//! input it receives to all players. Delivery is made reliable on top of UDP
//! with sequence numbers, application-level acknowledgements and timed
//! retransmission.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! The first `connect` from an address registers it under the lowest free
//! player id. Repeated connects from the same address return the same id.
//! Existing players are told about each newcomer with a `join` notice.
//!
//! ### Input Relay
//! Every `data` packet is stored against its step and immediately broadcast to
//! all players, the sender included. The relay never waits for a step to be
//! complete; deciding when to advance is left to the players.
//!
//! ### Reliable Delivery
//! Each broadcast copy carries its own sequence number and stays in the
//! pending table until its recipient acknowledges it. Unacknowledged copies
//! are resent every resend threshold for as long as the process runs.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All relay state is owned by one [`relay::Relay`] value driven by the
//! [`network::Server`] loop. Inbound packets and retry ticks are processed one
//! at a time, so handlers never observe a partially applied update.
//!
//! ### UDP-Based Communication
//! Socket reads and writes happen on their own tasks and talk to the loop over
//! channels. Sends are fire-and-forget; a failed send is logged and never
//! stops delivery to other players.
//!
//! ## Module Organization
//!
//! - `registry`: player ids and address lookup
//! - `reliability`: sequence numbers and the pending acknowledgement table
//! - `steps`: step-indexed input history with bounded retention
//! - `relay`: packet routing and broadcast fan-out
//! - `network`: UDP socket tasks and the event loop
//! - `config`: runtime settings
//! - `error`: error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig::default()).await?;
//!
//!     // Runs until a shutdown message arrives:
//!     // - relays connect, start, data and ack packets
//!     // - resends unacknowledged packets every resend threshold
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod relay;
pub mod reliability;
pub mod steps;

pub use error::{RelayError, Result};
