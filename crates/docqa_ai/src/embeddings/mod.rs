use docqa_core::error::AppError;

/// Raw embedding backend. Returns one vector per input, in input order.
///
/// Vectors need not be normalized; `EmbeddingProvider` does that.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError>;
}

pub mod hashing;
pub mod ollama_embed;
pub mod provider;

pub use hashing::HashingEmbedder;
pub use ollama_embed::OllamaEmbedder;
pub use provider::{l2_normalize, EmbeddingCache, EmbeddingProvider};
