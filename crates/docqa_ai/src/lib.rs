pub mod embeddings;
pub mod engine;
pub mod index;
pub mod llm;
pub mod ollama;

pub use embeddings::{EmbeddingCache, EmbeddingProvider};
pub use engine::{EngineStats, RagEngine};
pub use index::{IndexStatus, SimilarityIndex};
