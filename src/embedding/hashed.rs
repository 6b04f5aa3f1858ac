//! Feature-hashing embedder
//!
//! Projects word unigrams and adjacent word pairs into a fixed number of
//! dimensions with signed feature hashing: one FNV-1a hash per feature,
//! where the low bits pick the slot and the top bit picks the sign.
//! Occurrence counts enter sublinearly (square root) so a repeated word
//! cannot dominate a vector, and the result is L2-normalized. There is no
//! vocabulary and no model file; the same text always hashes to the same
//! vector, which the retrieval tests rely on.

use std::collections::HashMap;

use crate::embedding::Embedder;
use crate::error::Result;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// Seeds keep unigram and pair features in disjoint hash spaces
const UNIGRAM_SEED: u64 = 0x75;
const PAIR_SEED: u64 = 0xb1;

/// Relative strength of adjacent-pair features against unigrams
const PAIR_WEIGHT: f32 = 0.4;

/// Signed feature-hashing embedder over unigrams and adjacent word pairs
pub struct HashedEmbedder {
    dimensions: usize,
}

impl HashedEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn words(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// FNV-1a over a seed and the feature parts, folding a separator
    /// between parts so ("ab", "c") and ("a", "bc") hash apart
    fn feature_hash(seed: u64, parts: &[&str]) -> u64 {
        let mut hash = FNV_OFFSET_BASIS ^ seed;
        for part in parts {
            for byte in part.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            hash ^= 0x1e;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];
        if self.dimensions == 0 {
            return Ok(vector);
        }
        let words = Self::words(text);
        if words.is_empty() {
            return Ok(vector);
        }

        // Occurrence count per feature hash; the class weight rides along
        // (a hash always belongs to exactly one class thanks to the seeds)
        let mut features: HashMap<u64, (f32, f32)> = HashMap::new();
        for word in &words {
            let key = Self::feature_hash(UNIGRAM_SEED, &[word.as_str()]);
            features.entry(key).or_insert((0.0, 1.0)).0 += 1.0;
        }
        for pair in words.windows(2) {
            let key = Self::feature_hash(PAIR_SEED, &[pair[0].as_str(), pair[1].as_str()]);
            features.entry(key).or_insert((0.0, PAIR_WEIGHT)).0 += 1.0;
        }

        for (key, (count, weight)) in features {
            let slot = (key % self.dimensions as u64) as usize;
            let sign = if key >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * weight * count.sqrt();
        }

        let norm = vector
            .iter()
            .map(|v| f64::from(*v) * f64::from(*v))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v = (f64::from(*v) / norm) as f32;
            }
        }
        Ok(vector)
    }

    fn dim(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashed"
    }
}
