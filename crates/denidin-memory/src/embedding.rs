use async_trait::async_trait;

use crate::error::MemoryError;

/// The external embedding collaborator. Production embedding providers are
/// out of scope — only this trait and a deterministic mock are shipped.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// Fixed dimension for this embedder's vectors.
    fn dimension(&self) -> usize;
}

/// Deterministic, dependency-free mock embedder for tests and default
/// wiring.
///
/// Hashes whitespace-separated tokens into a fixed-size bag-of-words vector
/// (the "hashing trick") and L2-normalises it, so cosine similarity behaves
/// sensibly: identical content yields similarity 1.0, and texts sharing
/// vocabulary score above texts that share none.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut vector = vec![0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let bucket = (fnv1a(token.as_bytes()) as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// `similarity = 1 - cosine_distance`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_has_similarity_one() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("the quick brown fox").await.unwrap();
        let b = embedder.embed("the quick brown fox").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn disjoint_vocabulary_has_low_similarity() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("apples oranges bananas").await.unwrap();
        let b = embedder.embed("rockets satellites orbits").await.unwrap();
        assert!(cosine_similarity(&a, &b) < 0.5);
    }
}
