//! # sift-core
//!
//! Core primitives shared by the sift tools.
//!
//! Provides:
//! - Seeded xxh3 hashing
//! - Character n-gram shingling

pub mod hashing;
pub mod shingle;

pub use hashing::{hash_str, hash_with_seed, hex16};
pub use shingle::{char_ngrams, shingle_hashes, DEFAULT_NGRAM_SIZE};
