//! Text embedders

use crate::error::{WriterError, WriterErrorKind};
use async_trait::async_trait;

/// Maps texts to fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// One vector per input text, same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WriterError>;
}

/// Signed feature hashing over lowercase alphanumeric tokens, L2-normalised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl HashingEmbedder {
    /// # Errors
    /// Returns error if `dimension` is zero
    pub fn new(dimension: usize) -> Result<Self, WriterError> {
        if dimension == 0 {
            return Err(WriterError::new(
                WriterErrorKind::Internal,
                "vector",
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            let bits = u64::from_le_bytes(head);
            let index = (bits % self.dimension as u64) as usize;
            vector[index] += if bits >> 63 == 0 { 1.0 } else { -1.0 };
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, WriterError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Cosine similarity; 0 when either vector is zero or lengths differ
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
