use docqa_core::error::AppError;
use sha2::{Digest, Sha256};

use super::Embedder;

pub const DEFAULT_DIMS: usize = 384;

/// Offline feature-hashing embedder over lowercase alphanumeric tokens.
///
/// Texts sharing words land close together; nothing semantic beyond that.
/// The model name is ignored.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMS)
    }
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut idx_bytes = [0u8; 8];
            idx_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(idx_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        // Keep empty text off the origin so normalization stays defined.
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, _model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(inputs.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_and_case_insensitive() {
        let e = HashingEmbedder::new(64);
        let a = e.embed("m", &["The Sky", "the sky"]).expect("embed");
        assert_eq!(a[0], a[1]);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn empty_text_is_not_the_zero_vector() {
        let e = HashingEmbedder::new(16);
        let v = e.embed("m", &[""]).expect("embed");
        assert!(v[0].iter().any(|x| *x != 0.0));
    }
}
