//! Error types

use crate::broker::BrokerError;

/// Crate-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed envelope: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_converts() {
        let err: Error = BrokerError::CapacityReached { max: 3 }.into();
        assert!(matches!(err, Error::Broker(BrokerError::CapacityReached { max: 3 })));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_protocol_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse.into();
        assert!(err.to_string().starts_with("malformed envelope"));
    }
}
