use std::fs;
use std::path::Path;

use docqa_ai::ollama::OllamaClient;
use docqa_ai::{EngineStats, RagEngine};
use docqa_core::config::{EmbeddingBackendKind, EngineConfig, GenerationBackendKind};
use docqa_core::domain::SourceEntry;
use docqa_core::error::{AppError, ErrorKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub source: String,
    pub chunks: usize,
}

#[derive(Debug, Serialize)]
pub struct RemoveSummary {
    pub name: String,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScoredHit {
    pub source: String,
    pub distance: f32,
    pub preview: String,
}

pub fn ingest_url(engine: &RagEngine, url: &str) -> Result<IngestSummary, AppError> {
    let chunks = engine.ingest_web(url)?;
    Ok(IngestSummary {
        source: url.trim().to_string(),
        chunks,
    })
}

pub fn ingest_pdf(engine: &RagEngine, path: &str) -> Result<IngestSummary, AppError> {
    let chunks = engine.ingest_pdf(path)?;
    Ok(IngestSummary {
        source: path.to_string(),
        chunks,
    })
}

/// Copy a local PDF into the uploads directory and ingest the copy.
pub fn upload(engine: &RagEngine, path: &Path) -> Result<IngestSummary, AppError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            AppError::validation("INGEST_FILE_INVALID", "Upload path has no file name")
                .with_details(format!("path={}", path.display()))
        })?;
    let bytes = fs::read(path).map_err(|e| {
        AppError::load("LOAD_PDF_FAILED", "Failed to read file for upload")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    let chunks = engine.ingest_upload(&file_name, &bytes)?;
    Ok(IngestSummary {
        source: file_name,
        chunks,
    })
}

pub fn sources(engine: &RagEngine) -> Vec<SourceEntry> {
    engine.list_sources()
}

/// `short` defaults to the matching listed entry for `name`.
pub fn remove(engine: &RagEngine, name: &str, short: Option<&str>) -> Result<RemoveSummary, AppError> {
    let short = match short {
        Some(s) => s.to_string(),
        None => engine
            .list_sources()
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.short)
            .unwrap_or_else(|| name.to_string()),
    };
    let removed = engine.remove_source(name, &short)?;
    Ok(RemoveSummary {
        name: name.to_string(),
        removed,
    })
}

pub fn search(engine: &RagEngine, query: &str, k: usize) -> Result<Vec<ScoredHit>, AppError> {
    Ok(engine
        .index()
        .search_with_scores(query, k)?
        .into_iter()
        .map(|(chunk, distance)| ScoredHit {
            source: chunk.source,
            distance,
            preview: chunk.content.chars().take(120).collect(),
        })
        .collect())
}

pub fn stats(engine: &RagEngine) -> EngineStats {
    engine.get_stats()
}

/// Only meaningful when a backend talks to a local Ollama.
pub fn health_check(cfg: &EngineConfig) -> Result<HealthStatus, AppError> {
    let uses_ollama = cfg.embedding_backend == EmbeddingBackendKind::Ollama
        || cfg.generation_backend == GenerationBackendKind::Ollama;
    if !uses_ollama {
        return Ok(HealthStatus {
            ok: true,
            message: "No Ollama backend configured".to_string(),
        });
    }
    let client = OllamaClient::new(&cfg.ollama_url)?;
    client.health_check(ErrorKind::Embedding)?;
    Ok(HealthStatus {
        ok: true,
        message: format!("Ollama reachable at {}", client.base_url()),
    })
}
