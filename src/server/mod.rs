//! Gateway server
//!
//! [`Gateway`] drives one connection through the broker and engine over any
//! [`MessageSource`]/[`MessageSink`] pair. [`GatewayServer`] is the TCP
//! front end speaking newline-delimited JSON.

pub mod config;
pub mod gateway;
pub mod listener;
pub mod transport;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use listener::GatewayServer;
pub use transport::{
    user_id_from_metadata, JsonLinesSink, JsonLinesSource, MessageSink, MessageSource,
};
