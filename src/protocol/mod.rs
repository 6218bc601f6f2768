//! Wire-level envelope types
//!
//! The transport hands the core already-decoded [`ClientEnvelope`] values and
//! drains [`ServerEnvelope`] values back out. Framing belongs to the transport.

pub mod envelope;

pub use envelope::{
    Ack, BroadcastEvent, ClientEnvelope, Heartbeat, Hello, LocationUpdate, MatchEvent, RideStatus,
    RideStatusUpdate, ServerBody, ServerEnvelope,
};
