//! Vector codec: packs embeddings into SQLite blobs and back.
//!
//! Blobs are little-endian IEEE-754 `f32`. Decoding infers the element count
//! from the byte length and refuses anything outside [`SUPPORTED_DIMENSIONS`],
//! so a truncated or foreign blob never masquerades as a vector.

use crate::error::{KnowledgeError, Result};

/// Current width produced by the external embedding daemon.
pub const CURRENT_DIMENSIONS: usize = 768;

/// Legacy width of the hashing fallback.
pub const FALLBACK_DIMENSIONS: usize = 512;

/// Legacy width of the in-process MiniLM model.
pub const MINILM_DIMENSIONS: usize = 384;

/// Every vector width that may coexist in one index.
pub const SUPPORTED_DIMENSIONS: [usize; 3] = [MINILM_DIMENSIONS, FALLBACK_DIMENSIONS, CURRENT_DIMENSIONS];

pub fn is_supported_dimension(len: usize) -> bool {
    SUPPORTED_DIMENSIONS.contains(&len)
}

/// Human label for a stored vector width, used in statistics.
pub fn dimension_label(len: usize) -> &'static str {
    match len {
        CURRENT_DIMENSIONS => "current",
        FALLBACK_DIMENSIONS => "legacy-fallback",
        MINILM_DIMENSIONS => "legacy-minilm",
        _ => "unsupported",
    }
}

/// Encode a vector as little-endian `f32` bytes.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode a blob produced by [`encode`].
///
/// Fails with [`KnowledgeError::DimensionUnsupported`] when the blob length is not
/// a whole number of floats or the float count is not a supported dimension.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(KnowledgeError::DimensionUnsupported {
            found: bytes.len() / 4,
        });
    }
    let len = bytes.len() / 4;
    if !is_supported_dimension(len) {
        return Err(KnowledgeError::DimensionUnsupported { found: len });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * 0.37).sin()).collect()
    }

    #[test]
    fn decode_restores_every_supported_width() {
        for dim in SUPPORTED_DIMENSIONS {
            let v = sample(dim);
            let blob = encode(&v);
            assert_eq!(blob.len(), dim * 4);
            assert_eq!(decode(&blob).unwrap(), v);
        }
    }

    #[test]
    fn encode_is_little_endian() {
        let blob = encode(&[1.0]);
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn decode_rejects_unsupported_width() {
        let blob = encode(&sample(100));
        match decode(&blob) {
            Err(KnowledgeError::DimensionUnsupported { found }) => assert_eq!(found, 100),
            other => panic!("expected DimensionUnsupported, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_ragged_blob() {
        let mut blob = encode(&sample(384));
        blob.pop();
        assert!(decode(&blob).is_err());
        assert!(decode(&[]).is_err());
    }
}
