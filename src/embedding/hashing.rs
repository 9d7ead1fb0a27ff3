//! Deterministic hashing embedder used when no embedding service is reachable.
//!
//! Feature hashing over tokens and adjacent-token bigrams into a fixed-width
//! accumulator, then L2 normalization. Lower quality than a learned model: it
//! captures lexical overlap only. Hashes are FNV-1a so vectors are stable across
//! processes and platforms.

use crate::knowledge::similarity::normalize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Weights for the three positions each token is hashed to.
const TOKEN_WEIGHTS: [f32; 3] = [1.0, 0.7, 0.5];
const BIGRAM_WEIGHT: f32 = 0.3;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text`. Empty or token-free text yields the zero vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f32; self.dimensions];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return acc;
        }

        let total = tokens.len() as f32;
        for token in &tokens {
            let tf = 1.0 / total;
            for (seed, weight) in TOKEN_WEIGHTS.iter().enumerate() {
                let h = fnv1a(token.as_bytes(), seed as u64);
                let slot = (h % self.dimensions as u64) as usize;
                acc[slot] += sign(h) * weight * tf;
            }
        }

        let mut bigram = String::new();
        for pair in tokens.windows(2) {
            bigram.clear();
            bigram.push_str(&pair[0]);
            bigram.push('_');
            bigram.push_str(&pair[1]);
            let h = fnv1a(bigram.as_bytes(), 7);
            let slot = (h % self.dimensions as u64) as usize;
            acc[slot] += sign(h) * BIGRAM_WEIGHT / total;
        }

        normalize(&mut acc);
        acc
    }
}

/// Lowercased alphanumeric runs of at least two characters.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = FNV_OFFSET ^ seed.wrapping_mul(FNV_PRIME);
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// High bit picks the sign so positions spread across positive and negative.
fn sign(hash: u64) -> f32 {
    if hash >> 63 == 0 {
        1.0
    } else {
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::similarity::cosine;

    #[test]
    fn output_has_configured_width_and_unit_norm() {
        let embedder = HashingEmbedder::new(512);
        let v = embedder.embed("Ownership and borrowing in Rust");
        assert_eq!(v.len(), 512);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn deterministic_across_instances() {
        let a = HashingEmbedder::new(384).embed("deterministic hashing");
        let b = HashingEmbedder::new(384).embed("deterministic hashing");
        assert_eq!(a, b);
    }

    #[test]
    fn lexical_overlap_scores_higher() {
        let embedder = HashingEmbedder::new(512);
        let base = embedder.embed("sourdough starter feeding schedule");
        let close = embedder.embed("feeding schedule for a sourdough starter");
        let far = embedder.embed("quarterly tax filing deadline");
        assert!(cosine(&base, &close) > cosine(&base, &far));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let v = HashingEmbedder::new(512).embed("  ! ");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn case_insensitive() {
        let embedder = HashingEmbedder::new(512);
        assert_eq!(embedder.embed("Graph Theory"), embedder.embed("graph theory"));
    }
}
