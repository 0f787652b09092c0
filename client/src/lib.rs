//! # Headless Match Client
//!
//! A peer that joins a match server over UDP and plays through a
//! `PeerSession`, the same one the host runs. Nothing here renders; input
//! comes from a seeded script so several clients can be pointed at one
//! server to exercise a full match.
//!
//! ## Module Organization
//!
//! - `driver`: scripted movement and item actions
//! - `network`: connection, packet handling and the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 0, Some(7), Duration::from_millis(16)).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod driver;
pub mod network;
