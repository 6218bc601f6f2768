//! Inbound and outbound envelope types
//!
//! Envelopes are tagged unions serialized with serde. Inbound envelopes
//! carry the client's own user ID, sequence and send time; outbound envelopes
//! carry a correlation ID and a logical ordering token.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Ride lifecycle status reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    #[default]
    Unspecified,
    /// Rider is waiting for a driver
    Looking,
    /// Driver is on the way
    EnRoute,
    /// Ride finished
    Completed,
    /// Ride cancelled by either side
    Cancelled,
}

/// Liveness ping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Heartbeat {
    pub user_id: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub sent_at_ms: i64,
}

/// Periodic position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LocationUpdate {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub bearing: f64,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub sent_at_ms: i64,
}

/// Ride status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RideStatusUpdate {
    pub ride_id: String,
    pub user_id: String,
    pub status: RideStatus,
    #[serde(default)]
    pub sent_at_ms: i64,
}

/// Message received from a client
///
/// Tags the engine does not recognize deserialize to [`ClientEnvelope::Unknown`]
/// so they can be discarded without failing the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Heartbeat(Heartbeat),
    LocationUpdate(LocationUpdate),
    RideStatusUpdate(RideStatusUpdate),
    #[serde(other)]
    Unknown,
}

impl ClientEnvelope {
    /// Metrics label for this envelope
    pub fn label(&self) -> &'static str {
        match self {
            ClientEnvelope::Heartbeat(_) => "heartbeat",
            ClientEnvelope::LocationUpdate(_) => "location",
            ClientEnvelope::RideStatusUpdate(_) => "status",
            ClientEnvelope::Unknown => "unknown",
        }
    }
}

/// First line sent on a framed connection, before any envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Hello {
    /// Missing or empty IDs are replaced with a fresh one
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Acknowledgement of a client request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub correlation_id: String,
    pub success: bool,
    pub detail: String,
}

/// Synthesized pairing of a rider with a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub ride_id: String,
    pub driver_id: String,
    pub rider_id: String,
    pub vehicle_plate: String,
    pub eta_seconds: i64,
    pub surge_multiplier: f64,
}

/// Topic-scoped payload fanned out to many sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub topic: String,
    pub payload: Bytes,
}

/// Body of a server envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerBody {
    Ack(Ack),
    MatchEvent(MatchEvent),
    BroadcastEvent(BroadcastEvent),
}

/// Message delivered to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub correlation_id: String,
    /// Logical ordering token; informative only, not a distributed clock
    pub lamport_time: i64,
    pub body: ServerBody,
}

impl ServerEnvelope {
    /// Create an envelope
    pub fn new(correlation_id: impl Into<String>, lamport_time: i64, body: ServerBody) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            lamport_time,
            body,
        }
    }

    /// Metrics label for this envelope
    pub fn label(&self) -> &'static str {
        match self.body {
            ServerBody::Ack(_) => "ack",
            ServerBody::MatchEvent(_) => "match_event",
            ServerBody::BroadcastEvent(_) => "broadcast",
        }
    }

    pub fn as_ack(&self) -> Option<&Ack> {
        match &self.body {
            ServerBody::Ack(ack) => Some(ack),
            _ => None,
        }
    }

    pub fn as_match(&self) -> Option<&MatchEvent> {
        match &self.body {
            ServerBody::MatchEvent(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_broadcast(&self) -> Option<&BroadcastEvent> {
        match &self.body {
            ServerBody::BroadcastEvent(event) => Some(event),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_envelope_tagging() {
        let json = r#"{"type":"ride_status_update","ride_id":"r1","user_id":"u1","status":"looking"}"#;
        let env: ClientEnvelope = serde_json::from_str(json).unwrap();

        match &env {
            ClientEnvelope::RideStatusUpdate(update) => {
                assert_eq!(update.ride_id, "r1");
                assert_eq!(update.status, RideStatus::Looking);
                assert_eq!(update.sent_at_ms, 0);
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        assert_eq!(env.label(), "status");
    }

    #[test]
    fn test_unrecognized_tag_is_unknown() {
        let json = r#"{"type":"telemetry_dump","blob":[1,2,3]}"#;
        let env: ClientEnvelope = serde_json::from_str(json).unwrap();

        assert_eq!(env, ClientEnvelope::Unknown);
        assert_eq!(env.label(), "unknown");
    }

    #[test]
    fn test_server_labels() {
        let ack = ServerEnvelope::new(
            "r1",
            1,
            ServerBody::Ack(Ack {
                correlation_id: "r1".into(),
                success: true,
                detail: "ok".into(),
            }),
        );
        assert_eq!(ack.label(), "ack");
        assert!(ack.as_ack().is_some());
        assert!(ack.as_match().is_none());

        let broadcast = ServerEnvelope::new(
            "c1",
            2,
            ServerBody::BroadcastEvent(BroadcastEvent {
                topic: "1234:5678".into(),
                payload: Bytes::from_static(&[0u8; 32]),
            }),
        );
        assert_eq!(broadcast.label(), "broadcast");
        assert_eq!(broadcast.as_broadcast().unwrap().payload.len(), 32);
    }
}
