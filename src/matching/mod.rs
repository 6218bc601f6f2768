//! Inbound envelope classification and routing
//!
//! The [`Engine`] owns a bounded work queue and a pool of workers that turn
//! client envelopes into deliveries through the [`Broker`](crate::broker::Broker).

pub mod config;
pub mod engine;
pub mod strategy;
pub mod zone;

pub use config::EngineConfig;
pub use engine::{Engine, WorkerPool};
pub use strategy::{MatchStrategy, RandomMatcher};
pub use zone::{user_bucket, zone_bucket, zone_key, LocationPayload, ZONE_BUCKETS};
