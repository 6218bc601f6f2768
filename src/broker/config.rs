//! Broker configuration

use crate::error::{Error, Result};

/// Sizing for the session broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Number of independently locked shards (fixed after construction)
    pub shard_count: usize,

    /// Ceiling on concurrently registered sessions
    pub max_sessions: usize,

    /// Default per-session mailbox capacity used by the gateway
    pub mailbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            shard_count: 64,
            max_sessions: 1_200_000,
            mailbox_capacity: 256,
        }
    }
}

impl BrokerConfig {
    /// Set the shard count
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Set the session ceiling
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the mailbox capacity
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Reject zero-sized settings
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be positive".into()));
        }
        if self.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be positive".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(Error::Config("mailbox_capacity must be positive".into()));
        }
        Ok(())
    }
}
