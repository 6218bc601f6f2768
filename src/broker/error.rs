//! Broker error types

/// Error returned by [`Broker::register`](super::Broker::register)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The global session ceiling is reached
    #[error("broker capacity reached ({max} sessions)")]
    CapacityReached { max: usize },

    /// A session cannot be created with an empty mailbox
    #[error("mailbox capacity must be positive")]
    InvalidMailboxCapacity,
}
