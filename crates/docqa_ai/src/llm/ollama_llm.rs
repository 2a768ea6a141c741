use docqa_core::error::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::generation("GENERATION_FAILED", "Failed to encode generate request")
                .with_details(e.to_string())
        })?;
        let v: GenerateResponse =
            self.client
                .post_json("/api/generate", body, ErrorKind::Generation, "GENERATION_FAILED")?;
        if v.response.trim().is_empty() {
            return Err(AppError::generation("GENERATION_EMPTY", "Generation response was empty"));
        }
        Ok(v.response)
    }
}
