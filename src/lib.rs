//! Sharded session broker and dispatch engine for ride-hailing streams
//!
//! Clients hold long-lived connections and stream heartbeats, location
//! updates and ride status changes. The crate keeps a sharded index of live
//! sessions, routes targeted and zone-scoped messages back out through
//! bounded per-session mailboxes, and synthesizes match events for riders
//! looking for a ride.
//!
//! # Example
//!
//! ```no_run
//! use ride_stream::{GatewayConfig, GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> ride_stream::Result<()> {
//!     let config = GatewayConfig::from_env()?;
//!     let server = GatewayServer::new(config)?;
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```
//!
//! Delivery is best effort: a full mailbox or work queue drops the message
//! and counts it through [`MetricsRecorder`] rather than blocking.

pub mod broker;
pub mod error;
pub mod matching;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use broker::{Broker, BrokerConfig, BrokerError};
pub use error::{Error, Result};
pub use matching::{Engine, EngineConfig, MatchStrategy, RandomMatcher, WorkerPool};
pub use protocol::{ClientEnvelope, ServerBody, ServerEnvelope};
pub use server::{Gateway, GatewayConfig, GatewayServer, MessageSink, MessageSource};
pub use session::{Outbound, Outgoing, Session};
pub use stats::{DropReason, GatewayMetrics, MetricsRecorder, MetricsSnapshot, NoopRecorder};
