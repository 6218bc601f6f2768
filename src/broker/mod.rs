//! Sharded session broker
//!
//! The broker indexes live sessions by user ID across a fixed array of
//! independently locked shards. A stable hash of the user ID picks the shard,
//! so register, detach and send agree on ownership without a directory.
//!
//! # Architecture
//!
//! ```text
//!                         Arc<Broker>
//!              ┌──────────────────────────────┐
//!              │ shards: [Shard; N]           │
//!              │   RwLock<user -> {id -> S}>  │
//!              │ session_count: AtomicUsize   │
//!              └───────┬───────────┬──────────┘
//!                      │           │
//!        send(user) ───┘           └─── broadcast(pred, factory)
//!        one shard                      every shard, one lock at a time
//!                      │           │
//!                      ▼           ▼
//!                 Session::enqueue (non-blocking)
//!                      │
//!                      ▼
//!                 Outbound::recv ──► transport
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod shard;
pub mod store;

pub use config::BrokerConfig;
pub use error::BrokerError;
pub use hash::stable_hash;
pub use shard::Shard;
pub use store::Broker;
