//! LSH signature generation for near-duplicate detection.
//!
//! A document's character shingles are min-hashed under `bands * rows`
//! seeded hash functions. The min-hash vector is cut into bands and each band
//! is rendered as one printable component, `"{band}+{hex}"`, where `hex`
//! concatenates the low 16 bits of every row in the band. Two documents are
//! candidate near-duplicates when they share at least one component.
//!
//! Components are plain strings so that a blacklist can be persisted as a
//! text file and reloaded by any later run.

use crate::document::Document;
use crate::pipeline::{Filter, Result};
use serde::{Deserialize, Serialize};
use sift_core::hashing::{hash_with_seed, hex16};
use sift_core::shingle::{shingle_hashes, DEFAULT_NGRAM_SIZE};
use std::collections::HashSet;

/// Default number of LSH bands.
pub const DEFAULT_NUM_BANDS: usize = 20;

/// Default number of min-hash rows per band.
pub const DEFAULT_ROWS_PER_BAND: usize = 10;

/// An LSH signature: one component per band, in band order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    components: Vec<String>,
}

impl Signature {
    /// Build a signature from precomputed components.
    ///
    /// Repeated components are dropped, keeping first-occurrence order.
    #[must_use]
    pub fn from_components(components: Vec<String>) -> Self {
        let mut seen = HashSet::with_capacity(components.len());
        let components = components
            .into_iter()
            .filter(|c| seen.insert(c.clone()))
            .collect();
        Self { components }
    }

    #[must_use]
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Whether the two signatures have any component in common.
    #[must_use]
    pub fn overlaps(&self, other: &Signature) -> bool {
        self.components.iter().any(|c| other.components.contains(c))
    }
}

/// Parameters of the signature generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Shingle width in characters.
    pub ngram_size: usize,
    /// Number of bands (components per signature).
    pub num_bands: usize,
    /// Min-hash rows per band.
    pub rows_per_band: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            ngram_size: DEFAULT_NGRAM_SIZE,
            num_bands: DEFAULT_NUM_BANDS,
            rows_per_band: DEFAULT_ROWS_PER_BAND,
        }
    }
}

impl SignatureConfig {
    /// Total number of min-hash functions.
    #[must_use]
    pub fn num_minhash(&self) -> usize {
        self.num_bands * self.rows_per_band
    }
}

/// Signature generator, usable directly or as a pipeline stage.
///
/// Hash function `i` is xxh3 seeded with `i`, so a given text always maps to
/// the same components regardless of process, platform or release.
#[derive(Clone, Debug)]
pub struct LshSignatureGenerator {
    config: SignatureConfig,
}

impl LshSignatureGenerator {
    #[must_use]
    pub fn new(config: SignatureConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// Compute the min-hash vector for a set of shingle tokens.
    ///
    /// Each token is re-hashed under every seed and the minimum is kept per
    /// seed. `tokens` is never empty for shingled text.
    #[must_use]
    pub fn minhashes(&self, tokens: &HashSet<u64>) -> Vec<u64> {
        let mut mins = vec![u64::MAX; self.config.num_minhash()];

        for &token in tokens {
            let token_bytes = token.to_le_bytes();
            for (seed, slot) in mins.iter_mut().enumerate() {
                let hash = hash_with_seed(&token_bytes, seed as u64);
                if hash < *slot {
                    *slot = hash;
                }
            }
        }

        mins
    }

    /// Generate the LSH signature of a text.
    #[must_use]
    pub fn generate(&self, text: &str) -> Signature {
        let tokens = shingle_hashes(text, self.config.ngram_size);
        let mins = self.minhashes(&tokens);

        let components = mins
            .chunks(self.config.rows_per_band.max(1))
            .take(self.config.num_bands)
            .enumerate()
            .map(|(band, rows)| {
                let hex: String = rows.iter().map(|&v| hex16(v)).collect();
                format!("{band}+{hex}")
            })
            .collect();

        Signature::from_components(components)
    }
}

impl Default for LshSignatureGenerator {
    fn default() -> Self {
        Self::new(SignatureConfig::default())
    }
}

impl Filter for LshSignatureGenerator {
    fn name(&self) -> &str {
        "lsh_signature"
    }

    fn apply(&self, doc: &mut Document) -> Result<()> {
        if doc.is_rejected() || !doc.signature().is_empty() {
            return Ok(());
        }
        let signature = self.generate(&doc.text);
        doc.set_signature(signature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_TEXT: &str = "吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。\
        何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。\
        吾輩はここで始めて人間というものを見た。しかもあとで聞くとそれは書生という\
        人間中で一番獰悪な種族であったそうだ。";

    #[test]
    fn test_signature_shape() {
        let generator = LshSignatureGenerator::default();
        let sig = generator.generate("The quick brown fox jumps over the lazy dog");

        assert_eq!(sig.len(), DEFAULT_NUM_BANDS);
        for (band, component) in sig.iter().enumerate() {
            let (prefix, hex) = component.split_once('+').unwrap();
            assert_eq!(prefix, band.to_string());
            assert_eq!(hex.len(), DEFAULT_ROWS_PER_BAND * 4);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_signature_deterministic() {
        let a = LshSignatureGenerator::default();
        let b = LshSignatureGenerator::default();
        assert_eq!(a.generate(LONG_TEXT), b.generate(LONG_TEXT));
    }

    #[test]
    fn test_identical_texts_overlap_fully() {
        let generator = LshSignatureGenerator::default();
        let s1 = generator.generate(LONG_TEXT);
        let s2 = generator.generate(LONG_TEXT);
        assert!(s1.overlaps(&s2));
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_near_duplicate_overlaps() {
        let generator = LshSignatureGenerator::default();
        let edited = LONG_TEXT.replacen("猫", "犬", 1);

        let s1 = generator.generate(LONG_TEXT);
        let s2 = generator.generate(&edited);

        assert_ne!(s1, s2);
        assert!(s1.overlaps(&s2), "one-character edit should share a band");
    }

    #[test]
    fn test_different_texts_do_not_overlap() {
        let generator = LshSignatureGenerator::default();
        let s1 = generator.generate("The quick brown fox jumps over the lazy dog");
        let s2 = generator.generate("Completely different text about machine learning algorithms");
        assert!(!s1.overlaps(&s2));
    }

    #[test]
    fn test_empty_text_has_signature() {
        let generator = LshSignatureGenerator::default();
        let sig = generator.generate("");
        assert_eq!(sig.len(), DEFAULT_NUM_BANDS);
    }

    #[test]
    fn test_custom_band_layout() {
        let generator = LshSignatureGenerator::new(SignatureConfig {
            ngram_size: 3,
            num_bands: 4,
            rows_per_band: 2,
        });
        let sig = generator.generate("abcdefgh");
        assert_eq!(sig.len(), 4);
        assert!(sig.iter().all(|c| c.len() == "0+".len() + 8));
    }

    #[test]
    fn test_filter_does_not_recompute() {
        let generator = LshSignatureGenerator::default();
        let mut doc = Document::new("some text");
        doc.set_signature(Signature::from_components(vec!["0+dead".into()]));

        generator.apply(&mut doc).unwrap();
        assert_eq!(doc.signature().components(), ["0+dead".to_string()]);
    }

    #[test]
    fn test_filter_skips_rejected() {
        let generator = LshSignatureGenerator::default();
        let mut doc = Document::new("some text");
        doc.reject();

        generator.apply(&mut doc).unwrap();
        assert!(doc.signature().is_empty());
    }
}
