//! Deterministic fallback embeddings and cosine similarity.
//!
//! Grounded on `examples/original_source/mcp-servers/safla-mcp/server.py`'s
//! `generate_local_embeddings`: when no real embedding model is available,
//! a SHA-512 digest of the text is mapped byte-for-byte into a 384-dim
//! vector. This keeps similarity search exact and reproducible without
//! pulling in a vector-indexing dependency (see spec §1 Non-goals).

use sha2::{Digest, Sha512};

/// Fixed output width, matching the reference implementation's 384-dim
/// pseudo-embeddings (SHA-512 produces 64 bytes, so each byte is reused
/// across a 6x tiling to reach 384 dimensions).
pub const EMBEDDING_DIM: usize = 384;

/// Capability for turning text into vectors. A real embedding model is an
/// acceptable substitution (see spec §4.1, Similarity); `HashEmbedder` is
/// the always-available fallback.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>>;
}

/// Deterministic SHA-512-derived embedder, used whenever no model-backed
/// embedder is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha512::digest(text.as_bytes());
        // SHA-512 only yields 64 bytes; tile it to reach 384 dimensions
        // deterministically rather than re-hashing (the reference
        // implementation only fills from a single 64-byte digest when the
        // vector is allowed to be shorter, but the spec pins the
        // dimensionality at 384, so we tile here).
        (0..EMBEDDING_DIM)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for a
/// zero-norm vector rather than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_deterministic() {
        let e = HashEmbedder;
        let a = e.embed_one("hello world");
        let b = e.embed_one("hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[test]
    fn different_text_differs() {
        let e = HashEmbedder;
        let a = e.embed_one("alpha");
        let b = e.embed_one("beta");
        assert_ne!(a, b);
    }

    #[test]
    fn cosine_similarity_self_is_one() {
        let e = HashEmbedder;
        let v = e.embed_one("identical");
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let zeros = vec![0.0f32; EMBEDDING_DIM];
        let e = HashEmbedder;
        let v = e.embed_one("x");
        assert_eq!(cosine_similarity(&zeros, &v), 0.0);
    }
}
