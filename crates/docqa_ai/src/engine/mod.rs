use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docqa_core::config::{EmbeddingBackendKind, EngineConfig, GenerationBackendKind};
use docqa_core::domain::{Chunk, Exchange, SourceEntry};
use docqa_core::error::{AppError, ErrorKind};
use docqa_core::ingest::{
    ensure_new_source, split_documents, validate_pdf_name, validate_upload_name, validate_url,
    DocumentLoader, PdfLoader, SplitterConfig, WebLoader,
};
use docqa_core::memory::{ConversationMemory, MemoryStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::embeddings::{Embedder, EmbeddingCache, EmbeddingProvider, HashingEmbedder, OllamaEmbedder};
use crate::index::{IndexStatus, SimilarityIndex};
use crate::llm::{ChatCompletionsLlm, Llm, OllamaLlm, RetryingLlm};
use crate::ollama::OllamaClient;

pub mod prompts;
pub mod response;

use response::{source_labels, ResponseFormatter};

pub const GREETING_REPLY: &str = "Hello! 👋 I'm your document assistant. I can help you find information from your uploaded documents. What would you like to know?";
pub const NO_DOCUMENTS_REPLY: &str = "I don't have access to any documents yet. Please upload some PDFs or add web content first, and I'll be happy to help answer your questions!";
pub const NO_RELEVANT_CONTENT_REPLY: &str = "I couldn't find specific information related to your question in the uploaded documents. Could you try rephrasing your question or asking about a different topic?";
pub const CONNECTIVITY_REPLY: &str = "I'm having trouble connecting to the AI service. Please check your internet connection and API key, then try again.";
pub const EMBEDDING_REPLY: &str = "I'm having trouble processing your question with the embedding model. Please try again in a moment.";
pub const SEARCH_REPLY: &str = "I'm having trouble searching through the documents. Please try rephrasing your question.";

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hlo",
    "hey",
    "hiya",
    "good morning",
    "good afternoon",
    "good evening",
    "how are you",
    "whats up",
    "what's up",
    "sup",
    "greetings",
    "howdy",
    "yo",
];

/// Chunks whose content goes into the prompt (and whose sources are cited).
const CONTEXT_CHUNKS: usize = 3;
/// Prior exchanges rendered into the prompt.
const CONTEXT_EXCHANGES: usize = 3;

pub fn is_simple_greeting(question: &str) -> bool {
    let q = question.trim();
    q.chars().count() < 3 || GREETINGS.contains(&q.to_lowercase().as_str())
}

/// User-facing reply for a failed query, chosen by where the failure happened.
pub fn canned_error_reply(err: &AppError) -> String {
    match err.kind {
        ErrorKind::Generation => CONNECTIVITY_REPLY.to_string(),
        ErrorKind::Embedding => EMBEDDING_REPLY.to_string(),
        ErrorKind::Index => SEARCH_REPLY.to_string(),
        ErrorKind::Load | ErrorKind::Validation => format!(
            "I encountered an issue while processing your question: {}. Please try again or rephrase your question.",
            err.message
        ),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineStats {
    pub memory: MemoryStats,
    pub index: IndexStatus,
}

/// Ingestion, retrieval and answering over one index and one conversation.
pub struct RagEngine {
    config: EngineConfig,
    index: SimilarityIndex,
    llm: Arc<dyn Llm>,
    pdf_loader: Arc<dyn DocumentLoader>,
    web_loader: Arc<dyn DocumentLoader>,
    formatter: ResponseFormatter,
    /// `None` when chat history is disabled.
    memory: Option<Mutex<ConversationMemory>>,
    /// Makes the duplicate check and the insert of one ingestion atomic.
    ingest_guard: Mutex<()>,
}

fn embedder_for(cfg: &EngineConfig) -> Result<Arc<dyn Embedder>, AppError> {
    match cfg.embedding_backend {
        EmbeddingBackendKind::Ollama => {
            let client = OllamaClient::new(&cfg.ollama_url)?
                .with_timeout(Duration::from_secs(cfg.request_timeout_secs));
            Ok(Arc::new(OllamaEmbedder::new(client)))
        }
        EmbeddingBackendKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
    }
}

fn llm_for(cfg: &EngineConfig) -> Result<Arc<dyn Llm>, AppError> {
    let timeout = Duration::from_secs(cfg.request_timeout_secs);
    let inner: Arc<dyn Llm> = match cfg.generation_backend {
        GenerationBackendKind::Groq => Arc::new(
            ChatCompletionsLlm::new(&cfg.generation_url, &cfg.generation_api_key)
                .with_sampling(cfg.max_tokens, cfg.temperature)
                .with_timeout(timeout),
        ),
        GenerationBackendKind::Ollama => {
            let client = OllamaClient::new(&cfg.ollama_url)?.with_timeout(timeout);
            Arc::new(OllamaLlm::new(client))
        }
    };
    Ok(Arc::new(RetryingLlm::new(inner, cfg.max_retries)))
}

impl RagEngine {
    /// Wire up the configured backends. The embedding model comes from
    /// `cache`, so engines built from the same cache share a loaded model.
    pub fn from_config(cfg: &EngineConfig, cache: &EmbeddingCache) -> Result<Self, AppError> {
        cfg.validate()?;
        let provider = cache.get_or_load(&cfg.embedding_model, || embedder_for(cfg))?;
        let llm = llm_for(cfg)?;
        Self::new(cfg.clone(), provider, llm)
    }

    pub fn new(config: EngineConfig, provider: Arc<EmbeddingProvider>, llm: Arc<dyn Llm>) -> Result<Self, AppError> {
        let index = SimilarityIndex::open(config.index_dir.clone(), provider, config.relevance_threshold);
        let web_loader = Arc::new(WebLoader::new(
            config.user_agent.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ));
        let memory = if config.enable_chat_history {
            tracing::info!(max_history = config.max_history, "chat history enabled");
            Some(Mutex::new(ConversationMemory::new(config.max_history)))
        } else {
            None
        };
        Ok(Self {
            index,
            llm,
            pdf_loader: Arc::new(PdfLoader::new()),
            web_loader,
            formatter: ResponseFormatter::new()?,
            memory,
            ingest_guard: Mutex::new(()),
            config,
        })
    }

    pub fn with_loaders(mut self, pdf_loader: Arc<dyn DocumentLoader>, web_loader: Arc<dyn DocumentLoader>) -> Self {
        self.pdf_loader = pdf_loader;
        self.web_loader = web_loader;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    fn splitter(&self) -> SplitterConfig {
        SplitterConfig {
            chunk_size: self.config.chunk_size,
            chunk_overlap: self.config.chunk_overlap,
        }
    }

    /// Load, split and index one source. Returns the number of chunks added.
    /// Callers hold `ingest_guard`.
    fn ingest_source(&self, source: &str, loader: &dyn DocumentLoader) -> Result<usize, AppError> {
        ensure_new_source(source, &self.index.list_sources())?;

        let mut docs = loader.load(source)?;
        for d in docs.iter_mut() {
            if d.source.is_empty() {
                d.source = source.to_string();
            }
        }
        let chunks = split_documents(&docs, self.splitter());
        if chunks.is_empty() {
            return Err(AppError::load("LOAD_NO_CONTENT", "Source produced no text chunks")
                .with_details(format!("source={source}")));
        }
        let added = self.index.insert(&chunks)?;
        tracing::info!(source, chunks = added, "ingested source");
        Ok(added)
    }

    pub fn ingest_web(&self, url: &str) -> Result<usize, AppError> {
        let url = validate_url(url)?;
        let _guard = self.ingest_guard.lock();
        self.ingest_source(&url, self.web_loader.as_ref())
    }

    pub fn ingest_pdf(&self, path: &str) -> Result<usize, AppError> {
        validate_pdf_name(path)?;
        let _guard = self.ingest_guard.lock();
        self.ingest_source(path, self.pdf_loader.as_ref())
    }

    /// Save an uploaded PDF under the uploads directory, then ingest it.
    ///
    /// The saved file is removed again if ingestion fails.
    pub fn ingest_upload(&self, file_name: &str, bytes: &[u8]) -> Result<usize, AppError> {
        validate_upload_name(file_name)?;
        let path = self.config.uploads_dir.join(file_name.trim());
        let source = path.to_string_lossy().to_string();
        let _guard = self.ingest_guard.lock();
        ensure_new_source(&source, &self.index.list_sources())?;

        fs::create_dir_all(&self.config.uploads_dir).map_err(|e| {
            AppError::load("UPLOAD_WRITE_FAILED", "Failed to create uploads directory")
                .with_details(format!("path={}; err={}", self.config.uploads_dir.display(), e))
        })?;
        fs::write(&path, bytes).map_err(|e| {
            AppError::load("UPLOAD_WRITE_FAILED", "Failed to save uploaded file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;

        match self.ingest_source(&source, self.pdf_loader.as_ref()) {
            Ok(n) => Ok(n),
            Err(e) => {
                if let Err(rm) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), err = %rm, "failed to remove upload after failed ingestion");
                }
                Err(e)
            }
        }
    }

    /// Answer `question`. Never fails: every failure becomes a canned reply,
    /// with the full error logged.
    pub fn query(&self, question: &str) -> String {
        let question = question.trim();
        if is_simple_greeting(question) {
            return GREETING_REPLY.to_string();
        }
        if self.index.is_empty() {
            return NO_DOCUMENTS_REPLY.to_string();
        }
        match self.answer(question) {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(
                    question,
                    kind = e.kind.as_str(),
                    code = %e.code,
                    err = %e,
                    "query failed"
                );
                canned_error_reply(&e)
            }
        }
    }

    fn answer(&self, question: &str) -> Result<String, AppError> {
        let hits = self.index.search(question, self.config.top_k)?;
        tracing::info!(question, hits = hits.len(), "search complete");
        if hits.is_empty() {
            return Ok(NO_RELEVANT_CONTENT_REPLY.to_string());
        }

        let top: &[Chunk] = &hits[..hits.len().min(CONTEXT_CHUNKS)];
        for (i, c) in top.iter().enumerate() {
            let preview: String = c.content.chars().take(100).collect();
            tracing::debug!(rank = i + 1, source = %c.source, preview = %preview, "context chunk");
        }
        let document_context = top.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n\n");
        let conversation_context = self.conversation_context(question);

        let prompt = prompts::answer_prompt(&conversation_context, question, &document_context);
        let raw = self.llm.generate(&self.config.generation_model, &prompt)?;

        let sources = source_labels(top);
        let answer = self.formatter.finish(&raw, &sources);

        if let Some(memory) = self.memory.as_ref() {
            memory.lock().add_exchange(question, &answer, &sources);
        }
        Ok(answer)
    }

    fn conversation_context(&self, question: &str) -> String {
        let Some(memory) = self.memory.as_ref() else {
            return String::new();
        };
        let memory = memory.lock();
        let mut context = memory.get_context(CONTEXT_EXCHANGES);
        if memory.is_follow_up(question) {
            if let Some(previous) = memory.recent_questions(2).last() {
                context.push_str(&prompts::follow_up_note(previous));
            }
        }
        context
    }

    /// Display rows for every indexed source, ordered by `short`.
    pub fn list_sources(&self) -> Vec<SourceEntry> {
        let mut out = self
            .index
            .list_sources()
            .iter()
            .map(|s| SourceEntry::from_source(s))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.short.cmp(&b.short));
        out
    }

    /// Remove a listed source. PDFs are keyed by their full path (`short`)
    /// and the uploaded copy is deleted; anything else is keyed by `name`.
    ///
    /// Rebuilds the index; see [`SimilarityIndex::remove_by_source`].
    pub fn remove_source(&self, name: &str, short: &str) -> Result<usize, AppError> {
        if name.trim().is_empty() || short.trim().is_empty() {
            return Err(AppError::validation("SOURCE_REMOVE_INVALID", "Source name and short are required"));
        }
        let _guard = self.ingest_guard.lock();
        if name.to_ascii_lowercase().ends_with(".pdf") {
            let removed = self.index.remove_by_source(short)?;
            tracing::info!(name, removed, "removed pdf source");
            if removed > 0 {
                self.delete_upload(Path::new(short));
            }
            Ok(removed)
        } else {
            let removed = self.index.remove_by_source(name)?;
            tracing::info!(
                name,
                removed,
                remaining = self.index.list_sources().len(),
                "removed url source"
            );
            Ok(removed)
        }
    }

    /// Best effort: only files inside the uploads directory are touched.
    fn delete_upload(&self, path: &Path) {
        let inside = match (fs::canonicalize(path), fs::canonicalize(&self.config.uploads_dir)) {
            (Ok(file), Ok(root)) => file.starts_with(root),
            _ => false,
        };
        if !inside {
            tracing::debug!(path = %path.display(), "not an upload; leaving file in place");
            return;
        }
        match fs::remove_file(path) {
            Ok(()) => tracing::info!(path = %path.display(), "deleted uploaded file"),
            Err(e) => tracing::warn!(path = %path.display(), err = %e, "failed to delete uploaded file"),
        }
    }

    pub fn get_history(&self) -> Vec<Exchange> {
        self.memory.as_ref().map(|m| m.lock().history()).unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Some(memory) = self.memory.as_ref() {
            memory.lock().clear();
        }
    }

    pub fn get_stats(&self) -> EngineStats {
        let memory = self
            .memory
            .as_ref()
            .map(|m| m.lock().stats())
            .unwrap_or(MemoryStats {
                total_exchanges: 0,
                capacity: 0,
                has_context: false,
            });
        EngineStats {
            memory,
            index: self.index.status(),
        }
    }

    /// Drop every indexed chunk and the persisted artifacts. Uploaded files stay.
    pub fn reset_index(&self) -> Result<(), AppError> {
        let _guard = self.ingest_guard.lock();
        self.index.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_and_tiny_inputs_short_circuit() {
        assert!(is_simple_greeting("hi"));
        assert!(is_simple_greeting("  Good Morning "));
        assert!(is_simple_greeting("What's up"));
        assert!(is_simple_greeting("ok"));
        assert!(!is_simple_greeting("hi there, what is in the report?"));
        assert!(!is_simple_greeting("why"));
    }

    #[test]
    fn error_kinds_map_to_distinct_replies() {
        let replies = [
            canned_error_reply(&AppError::generation("X", "down")),
            canned_error_reply(&AppError::embedding("X", "down")),
            canned_error_reply(&AppError::index("X", "down")),
            canned_error_reply(&AppError::load("X", "bad input").with_details("secret")),
        ];
        for (i, a) in replies.iter().enumerate() {
            for b in replies.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(replies[3].contains("bad input"));
        assert!(!replies[3].contains("secret"));
    }
}
