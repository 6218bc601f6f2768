//! Stable string hashing
//!
//! Shard ownership and zone buckets must agree across calls for the life of
//! the process, so this is a fixed FNV-1a rather than the randomly seeded
//! std hasher.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a of `value`
pub fn stable_hash(value: &str) -> u64 {
    value.as_bytes().iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
