//! # Match Server Library
//!
//! The server-authoritative peer of a match. It owns no special game logic:
//! it plays as `PeerId::SERVER` through the same `PeerSession` every client
//! runs, and on top of that it is the hub every datagram passes through.
//!
//! ## Responsibilities
//!
//! ### Connection management
//! Peers connect over UDP, get an id from 1 upward and are dropped after
//! five seconds of silence. Protocol versions must match exactly.
//!
//! ### Call routing
//! Clients send `Packet::Call { target, rpc }`. The server delivers it to
//! one peer, to every other peer, or to everyone plus every peer that joins
//! later (`RpcTarget::AllBuffered`). Replication samples are relayed to
//! every peer except their owner.
//!
//! ### Match start
//! Once the expected number of peers is connected the readiness barrier is
//! armed; when all of them have sent `ClientReady`, roles are drawn for the
//! host and those peers and delivered one by one.
//!
//! ## Module Organization
//!
//! - `client_manager`: connected peers, addresses, timeouts
//! - `buffered`: the replay log for late joiners
//! - `match_coordinator`: readiness barrier and role draw
//! - `network`: socket tasks, routing and the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig {
//!         addr: "127.0.0.1:8080".to_string(),
//!         tick_duration: Duration::from_millis(16),
//!         max_clients: 16,
//!         expected_peers: 3,
//!         seed: None,
//!     })
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod buffered;
pub mod client_manager;
pub mod error;
pub mod match_coordinator;
pub mod network;

pub use error::ServerError;
pub use network::{Server, ServerConfig, ServerMessage};
