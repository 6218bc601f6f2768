//! Coarse geo-zone bucketing
//!
//! Positions are quantized to hundredths of a degree and hashed into one of
//! [`ZONE_BUCKETS`] buckets. Sessions are placed in buckets by hashing their
//! user ID. This is an approximation for fan-out, not geofencing: two
//! sessions in the same bucket need not be near each other.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::broker::stable_hash;
use crate::protocol::LocationUpdate;

/// Number of hash buckets used for zone fan-out
pub const ZONE_BUCKETS: u64 = 32;

/// Encoded size of a location payload
pub const LOCATION_PAYLOAD_LEN: usize = 32;

/// Quantized zone key, `"{lat*100}:{lon*100}"` truncated toward zero
pub fn zone_key(latitude: f64, longitude: f64) -> String {
    format!("{}:{}", (latitude * 100.0) as i64, (longitude * 100.0) as i64)
}

/// Bucket a zone key falls into
pub fn zone_bucket(zone: &str) -> u64 {
    stable_hash(zone) % ZONE_BUCKETS
}

/// Bucket a user's sessions are considered to be in
pub fn user_bucket(user_id: &str) -> u64 {
    stable_hash(user_id) % ZONE_BUCKETS
}

/// Position fields carried in a zone broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub speed_mps: f64,
}

impl LocationPayload {
    /// Encode as four little-endian f64 values
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LOCATION_PAYLOAD_LEN);
        buf.put_f64_le(self.latitude);
        buf.put_f64_le(self.longitude);
        buf.put_f64_le(self.bearing);
        buf.put_f64_le(self.speed_mps);
        buf.freeze()
    }

    /// Decode a payload produced by [`encode`](Self::encode)
    pub fn decode(mut data: &[u8]) -> Option<Self> {
        if data.len() < LOCATION_PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            latitude: data.get_f64_le(),
            longitude: data.get_f64_le(),
            bearing: data.get_f64_le(),
            speed_mps: data.get_f64_le(),
        })
    }
}

impl From<&LocationUpdate> for LocationPayload {
    fn from(update: &LocationUpdate) -> Self {
        Self {
            latitude: update.latitude,
            longitude: update.longitude,
            bearing: update.bearing,
            speed_mps: update.speed_mps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_key_quantizes() {
        assert_eq!(zone_key(12.34, 56.78), "1234:5678");
        assert_eq!(zone_key(12.349, 56.781), "1234:5678");
        assert_eq!(zone_key(37.7749, -122.4194), "3777:-12241");
        assert_eq!(zone_key(-0.001, 0.0), "0:0");
    }

    #[test]
    fn test_buckets_in_range() {
        for i in 0..100 {
            assert!(user_bucket(&format!("user-{}", i)) < ZONE_BUCKETS);
        }
        assert!(zone_bucket("1234:5678") < ZONE_BUCKETS);
        assert_eq!(zone_bucket("1234:5678"), zone_bucket(&zone_key(12.34, 56.78)));
    }

    #[test]
    fn test_payload_layout() {
        let payload = LocationPayload {
            latitude: 12.34,
            longitude: 56.78,
            bearing: 90.0,
            speed_mps: 8.5,
        };
        let bytes = payload.encode();

        assert_eq!(bytes.len(), LOCATION_PAYLOAD_LEN);
        assert_eq!(&bytes[0..8], &12.34f64.to_le_bytes());
        assert_eq!(&bytes[24..32], &8.5f64.to_le_bytes());
        assert_eq!(LocationPayload::decode(&bytes), Some(payload));
        assert_eq!(LocationPayload::decode(&bytes[..31]), None);
    }
}
