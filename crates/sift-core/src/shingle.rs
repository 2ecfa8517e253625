//! Character n-gram shingling.
//!
//! Corpora handled by sift are frequently written without word separators,
//! so shingles are taken over Unicode scalar values rather than words.

use crate::hashing::hash_str;
use std::collections::HashSet;

/// Default shingle width in characters.
pub const DEFAULT_NGRAM_SIZE: usize = 5;

/// Split text into overlapping character n-grams.
///
/// A text shorter than `n` characters (including the empty text) yields
/// exactly one shingle: the text itself.
#[must_use]
pub fn char_ngrams(text: &str, n: usize) -> Vec<&str> {
    let n = n.max(1);
    // Byte offsets of every char boundary, including the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;

    if char_count < n {
        return vec![text];
    }

    (0..=char_count - n)
        .map(|i| &text[bounds[i]..bounds[i + n]])
        .collect()
}

/// Tokenize text into the set of its shingle hashes.
#[must_use]
pub fn shingle_hashes(text: &str, n: usize) -> HashSet<u64> {
    char_ngrams(text, n).into_iter().map(hash_str).collect()
}
