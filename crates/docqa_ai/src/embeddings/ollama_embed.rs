use docqa_core::error::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::OllamaClient;

/// Inputs per request to `/api/embed`.
const BATCH_SIZE: usize = 32;

/// Per-input cap. Chunking keeps inputs far below this, but guard anyway.
const MAX_INPUT_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn bounded(input: &str) -> &str {
    match input.char_indices().nth(MAX_INPUT_CHARS) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(BATCH_SIZE) {
            let req = EmbedRequest {
                model,
                input: batch.iter().copied().map(bounded).collect(),
            };
            let body = serde_json::to_value(&req).map_err(|e| {
                AppError::embedding("EMBEDDINGS_FAILED", "Failed to encode embeddings request")
                    .with_details(e.to_string())
            })?;
            let resp: EmbedResponse =
                self.client
                    .post_json("/api/embed", body, ErrorKind::Embedding, "EMBEDDINGS_FAILED")?;
            if resp.embeddings.len() != batch.len() {
                return Err(AppError::embedding(
                    "EMBEDDINGS_FAILED",
                    "Embeddings response count does not match request",
                )
                .with_details(format!(
                    "model={model}; expected={}; got={}",
                    batch.len(),
                    resp.embeddings.len()
                )));
            }
            out.extend(resp.embeddings);
        }
        Ok(out)
    }
}
