use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    Ollama,
    Hashing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackendKind {
    /// OpenAI-compatible chat completions (Groq by default).
    Groq,
    Ollama,
}

/// Runtime configuration for the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the persisted index artifacts.
    pub index_dir: PathBuf,
    /// Where uploaded PDFs are stored before ingestion.
    pub uploads_dir: PathBuf,
    pub embedding_backend: EmbeddingBackendKind,
    /// Must stay the same for the lifetime of an index.
    pub embedding_model: String,
    pub ollama_url: String,
    pub generation_backend: GenerationBackendKind,
    pub generation_url: String,
    #[serde(skip_serializing)]
    pub generation_api_key: String,
    pub generation_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    /// Maximum squared-L2 distance for a hit to count as relevant.
    ///
    /// Hazard: the scale of this value depends on the embedding model. Changing
    /// `embedding_model` silently changes what a given threshold means.
    pub relevance_threshold: f32,
    pub enable_chat_history: bool,
    pub max_history: usize,
    pub user_agent: String,
}

pub const DEFAULT_GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
/// Permissive on purpose: normalized vectors never exceed a squared distance of 4.
pub const DEFAULT_RELEVANCE_THRESHOLD: f32 = 10.0;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("faiss_index"),
            uploads_dir: PathBuf::from("uploads"),
            embedding_backend: EmbeddingBackendKind::Ollama,
            embedding_model: "all-minilm".to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            generation_backend: GenerationBackendKind::Groq,
            generation_url: DEFAULT_GROQ_URL.to_string(),
            generation_api_key: String::new(),
            generation_model: "qwen/qwen3-32b".to_string(),
            max_tokens: 1024,
            temperature: 0.1,
            request_timeout_secs: 60,
            max_retries: 2,
            chunk_size: 1089,
            chunk_overlap: 108,
            top_k: 5,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            enable_chat_history: true,
            max_history: 10,
            user_agent: "RAG-LangChain-App/1.0 (Document Processing Bot)".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables (after loading `.env`, if present).
    pub fn from_env() -> Result<Self, AppError> {
        // A missing .env file is normal.
        let _ = dotenv::dotenv();
        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DOCQA_INDEX_DIR") {
            cfg.index_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCQA_UPLOADS_DIR") {
            cfg.uploads_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DOCQA_EMBEDDING_BACKEND") {
            cfg.embedding_backend = match v.trim().to_ascii_lowercase().as_str() {
                "ollama" => EmbeddingBackendKind::Ollama,
                "hashing" => EmbeddingBackendKind::Hashing,
                other => {
                    return Err(AppError::validation(
                        "CONFIG_INVALID",
                        "DOCQA_EMBEDDING_BACKEND must be ollama or hashing",
                    )
                    .with_details(format!("value={other}")))
                }
            };
        }
        if let Some(v) = get("DOCQA_EMBEDDING_MODEL") {
            cfg.embedding_model = v;
        }
        if let Some(v) = get("DOCQA_OLLAMA_URL") {
            cfg.ollama_url = v;
        }
        if let Some(v) = get("DOCQA_GENERATION_BACKEND") {
            cfg.generation_backend = match v.trim().to_ascii_lowercase().as_str() {
                "groq" | "openai" => GenerationBackendKind::Groq,
                "ollama" => GenerationBackendKind::Ollama,
                other => {
                    return Err(AppError::validation(
                        "CONFIG_INVALID",
                        "DOCQA_GENERATION_BACKEND must be groq or ollama",
                    )
                    .with_details(format!("value={other}")))
                }
            };
        }
        if let Some(v) = get("DOCQA_GENERATION_URL") {
            cfg.generation_url = v;
        }
        if let Some(v) = get("GROQ_API_KEY") {
            cfg.generation_api_key = v;
        }
        if let Some(v) = get("DOCQA_GENERATION_MODEL") {
            cfg.generation_model = v;
        }
        if let Some(v) = get("USER_AGENT") {
            cfg.user_agent = v;
        }

        cfg.max_tokens = parse_or(&get, "DOCQA_MAX_TOKENS", cfg.max_tokens)?;
        cfg.temperature = parse_or(&get, "DOCQA_TEMPERATURE", cfg.temperature)?;
        cfg.request_timeout_secs =
            parse_or(&get, "DOCQA_REQUEST_TIMEOUT_SECS", cfg.request_timeout_secs)?;
        cfg.max_retries = parse_or(&get, "DOCQA_MAX_RETRIES", cfg.max_retries)?;
        cfg.chunk_size = parse_or(&get, "DOCQA_CHUNK_SIZE", cfg.chunk_size)?;
        cfg.chunk_overlap = parse_or(&get, "DOCQA_CHUNK_OVERLAP", cfg.chunk_overlap)?;
        cfg.top_k = parse_or(&get, "DOCQA_TOP_K", cfg.top_k)?;
        cfg.relevance_threshold =
            parse_or(&get, "DOCQA_RELEVANCE_THRESHOLD", cfg.relevance_threshold)?;
        cfg.enable_chat_history = parse_or(&get, "DOCQA_CHAT_HISTORY", cfg.enable_chat_history)?;
        cfg.max_history = parse_or(&get, "DOCQA_MAX_HISTORY", cfg.max_history)?;

        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 {
            return Err(AppError::validation("CONFIG_INVALID", "chunk_size must be positive"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::validation(
                "CONFIG_INVALID",
                "chunk_overlap must be smaller than chunk_size",
            )
            .with_details(format!(
                "chunk_size={}; chunk_overlap={}",
                self.chunk_size, self.chunk_overlap
            )));
        }
        if self.top_k == 0 {
            return Err(AppError::validation("CONFIG_INVALID", "top_k must be positive"));
        }
        if self.max_history == 0 {
            return Err(AppError::validation("CONFIG_INVALID", "max_history must be positive"));
        }
        if !self.relevance_threshold.is_finite() {
            return Err(AppError::validation(
                "CONFIG_INVALID",
                "relevance_threshold must be a finite number",
            ));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(AppError::validation("CONFIG_INVALID", "embedding_model is required"));
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, fallback: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(fallback),
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AppError::validation("CONFIG_INVALID", format!("{key} could not be parsed"))
                .with_details(format!("value={raw}; err={e}"))
        }),
    }
}
