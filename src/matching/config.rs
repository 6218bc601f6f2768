//! Matching engine configuration

use crate::error::{Error, Result};

/// Sizing for the matching worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Number of concurrent workers sharing the queue
    pub workers: usize,

    /// Capacity of the shared work queue
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 256,
            queue_capacity: 64_000,
        }
    }
}

impl EngineConfig {
    /// Set the worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Reject zero-sized settings
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 256);
        assert_eq!(config.queue_capacity, 64_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(EngineConfig::default().workers(0).validate().is_err());
        assert!(EngineConfig::default().queue_capacity(0).validate().is_err());
    }
}
