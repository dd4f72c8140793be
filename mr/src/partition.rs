//! Key partitioning shared by the Map writers and the Reduce readers.
//!
//! Every process in a job must route a key to the same bucket, so the hash is
//! fixed to 32-bit FNV-1a rather than anything seeded per process.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a of `key`, masked to a non-negative `i32` range.
pub fn ihash(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash & 0x7fff_ffff
}

/// Bucket a key belongs to. `bucket_count` must be non-zero.
pub fn bucket_for(key: &str, bucket_count: u32) -> u32 {
    ihash(key) % bucket_count
}
