//! Hashing functions.
//!
//! Everything that ends up in a persisted blacklist is derived from these
//! functions, so their output must never change between releases.

/// Hash with seed for MinHash-style algorithms.
#[inline]
pub fn hash_with_seed(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(data, seed)
}

/// Hash a string slice with the zero seed.
///
/// Used to turn a shingle into the token that min-hashing permutes.
#[inline]
pub fn hash_str(text: &str) -> u64 {
    hash_with_seed(text.as_bytes(), 0)
}

/// Low 16 bits of a hash as four lowercase hex digits.
#[must_use]
pub fn hex16(value: u64) -> String {
    format!("{:04x}", value & 0xffff)
}
