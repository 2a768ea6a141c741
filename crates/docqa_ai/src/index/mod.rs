use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use docqa_core::domain::{now_rfc3339_utc, Chunk};
use docqa_core::error::AppError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingProvider;

mod distance;
mod storage;

pub use distance::squared_l2;

use storage::{IndexStore, PersistedIndex, Snapshot};

#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub id: u64,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
struct IndexState {
    entries: Vec<IndexEntry>,
    next_id: u64,
    updated_at: String,
}

impl From<PersistedIndex> for IndexState {
    fn from(p: PersistedIndex) -> Self {
        Self {
            entries: p.entries,
            next_id: p.next_id,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStatus {
    pub ready: bool,
    pub model: String,
    pub dims: u32,
    pub chunk_count: u32,
    pub source_count: u32,
    pub updated_at: Option<String>,
}

/// Persistent flat index over chunk embeddings (squared L2 on unit vectors).
///
/// Searches take a read lock on the in-memory state. Mutations are serialized
/// by a separate guard and persist to disk before they become visible. The
/// store commits a write with a single sidecar rename, so a failed write
/// leaves both memory and disk at the last good state.
pub struct SimilarityIndex {
    store: IndexStore,
    provider: Arc<EmbeddingProvider>,
    relevance_threshold: f32,
    state: RwLock<Option<IndexState>>,
    write_guard: Mutex<()>,
}

impl SimilarityIndex {
    /// Open the index at `dir`, restoring persisted state when present.
    ///
    /// Missing, corrupt, or foreign-model artifacts start an empty index.
    /// The threshold is a raw distance; its meaning depends on the embedding
    /// model.
    pub fn open(dir: PathBuf, provider: Arc<EmbeddingProvider>, relevance_threshold: f32) -> Self {
        let index = Self {
            store: IndexStore::open(dir),
            provider,
            relevance_threshold,
            state: RwLock::new(None),
            write_guard: Mutex::new(()),
        };
        index.load();
        index
    }

    /// Replace in-memory state with whatever is on disk.
    pub fn load(&self) {
        let _guard = self.write_guard.lock();
        let restored = match self.store.read(self.provider.model(), self.provider.dims()) {
            Ok(Some(p)) => {
                tracing::info!(
                    path = %self.store.root().display(),
                    model = %p.model,
                    dims = p.dims,
                    chunks = p.entries.len(),
                    "loaded similarity index"
                );
                Some(IndexState::from(p))
            }
            Ok(None) => {
                tracing::debug!(path = %self.store.root().display(), "no persisted index; starting empty");
                None
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.store.root().display(),
                    err = %e,
                    "ignoring unusable persisted index; starting empty"
                );
                None
            }
        };
        *self.state.write() = restored;
    }

    pub fn relevance_threshold(&self) -> f32 {
        self.relevance_threshold
    }

    pub fn is_empty(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .map(|s| s.entries.is_empty())
            .unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.state.read().as_ref().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Embed and add `chunks`, then persist. Returns the number added.
    ///
    /// Cost is one embedding call for the batch plus one rewrite of the
    /// artifacts. Nothing is applied if either step fails.
    pub fn insert(&self, chunks: &[Chunk]) -> Result<usize, AppError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts = chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>();
        let vectors = self.provider.embed(&texts)?;

        let _guard = self.write_guard.lock();
        let updated_at = now_rfc3339_utc()?;
        let (start_id, new_entries) = {
            let state = self.state.read();
            let start_id = state.as_ref().map(|s| s.next_id).unwrap_or(0);
            let new_entries = chunks
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, (chunk, vector))| IndexEntry {
                    id: start_id + i as u64,
                    chunk: chunk.clone(),
                    vector,
                })
                .collect::<Vec<_>>();
            let mut all = state
                .as_ref()
                .map(|s| s.entries.iter().collect::<Vec<_>>())
                .unwrap_or_default();
            all.extend(new_entries.iter());
            self.store.write(&Snapshot {
                model: self.provider.model(),
                dims: self.provider.dims(),
                next_id: start_id + new_entries.len() as u64,
                updated_at: &updated_at,
                entries: all,
            })?;
            (start_id, new_entries)
        };

        let added = new_entries.len();
        let mut state = self.state.write();
        match state.as_mut() {
            Some(s) => {
                s.entries.extend(new_entries);
                s.next_id = start_id + added as u64;
                s.updated_at = updated_at;
            }
            None => {
                *state = Some(IndexState {
                    entries: new_entries,
                    next_id: added as u64,
                    updated_at,
                });
            }
        }
        let total = state.as_ref().map(|s| s.entries.len()).unwrap_or(0);
        tracing::info!(chunks = added, total, "indexed chunks");
        Ok(added)
    }

    /// Up to `k` chunks, nearest first.
    ///
    /// Takes the `2k` nearest candidates and keeps those whose distance is
    /// strictly below the relevance threshold. If none survive, the best `k`
    /// raw candidates are returned instead, so a non-empty index never yields
    /// an empty result. An empty index returns empty without embedding.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<Chunk>, AppError> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let qv = self.provider.embed_one(query)?;
        let candidates = self.nearest(&qv, k.saturating_mul(2));

        let relevant = candidates
            .iter()
            .filter(|(_, score)| *score < self.relevance_threshold)
            .take(k)
            .map(|(chunk, _)| chunk.clone())
            .collect::<Vec<_>>();
        if !relevant.is_empty() {
            return Ok(relevant);
        }
        tracing::debug!(
            candidates = candidates.len(),
            threshold = self.relevance_threshold,
            "no candidate under relevance threshold; using raw nearest"
        );
        Ok(candidates.into_iter().take(k).map(|(chunk, _)| chunk).collect())
    }

    /// The `k` nearest chunks with their distances, unfiltered.
    pub fn search_with_scores(&self, query: &str, k: usize) -> Result<Vec<(Chunk, f32)>, AppError> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let qv = self.provider.embed_one(query)?;
        Ok(self.nearest(&qv, k))
    }

    /// Flat scan. Ties break on insertion id so results are deterministic.
    fn nearest(&self, qv: &[f32], limit: usize) -> Vec<(Chunk, f32)> {
        let state = self.state.read();
        let Some(s) = state.as_ref() else {
            return Vec::new();
        };
        let mut scored = s
            .entries
            .iter()
            .map(|e| (e, squared_l2(qv, &e.vector)))
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.id.cmp(&b.0.id)));
        scored
            .into_iter()
            .take(limit)
            .map(|(e, score)| (e.chunk.clone(), score))
            .collect()
    }

    /// Drop every chunk whose source equals `source`; returns how many.
    ///
    /// This rebuilds the whole index from the kept chunks and rewrites both
    /// artifacts: O(total chunks) per call, so keep it off hot paths. Stored
    /// vectors are reused; nothing is re-embedded. When nothing matches the
    /// index is left untouched, and when nothing remains it is cleared.
    pub fn remove_by_source(&self, source: &str) -> Result<usize, AppError> {
        let _guard = self.write_guard.lock();

        let (removed, rewritten_at) = {
            let state = self.state.read();
            let Some(s) = state.as_ref() else {
                return Ok(0);
            };
            let kept = s
                .entries
                .iter()
                .filter(|e| e.chunk.source != source)
                .collect::<Vec<_>>();
            let removed = s.entries.len() - kept.len();
            if removed == 0 {
                return Ok(0);
            }
            if kept.is_empty() {
                (removed, None)
            } else {
                let updated_at = now_rfc3339_utc()?;
                self.store.write(&Snapshot {
                    model: self.provider.model(),
                    dims: self.provider.dims(),
                    next_id: s.next_id,
                    updated_at: &updated_at,
                    entries: kept,
                })?;
                (removed, Some(updated_at))
            }
        };

        match rewritten_at {
            None => {
                self.store.remove_all()?;
                *self.state.write() = None;
            }
            Some(updated_at) => {
                let mut state = self.state.write();
                if let Some(s) = state.as_mut() {
                    s.entries.retain(|e| e.chunk.source != source);
                    s.updated_at = updated_at;
                }
            }
        }
        tracing::info!(source, removed, "removed source from index");
        Ok(removed)
    }

    /// Distinct sources. Metadata only; never embeds.
    pub fn list_sources(&self) -> BTreeSet<String> {
        self.state
            .read()
            .as_ref()
            .map(|s| s.entries.iter().map(|e| e.chunk.source.clone()).collect())
            .unwrap_or_default()
    }

    pub fn status(&self) -> IndexStatus {
        let state = self.state.read();
        let (chunk_count, source_count, updated_at) = match state.as_ref() {
            Some(s) => {
                let sources = s.entries.iter().map(|e| e.chunk.source.as_str()).collect::<BTreeSet<_>>();
                (s.entries.len(), sources.len(), Some(s.updated_at.clone()))
            }
            None => (0, 0, None),
        };
        IndexStatus {
            ready: chunk_count > 0,
            model: self.provider.model().to_string(),
            dims: self.provider.dims() as u32,
            chunk_count: chunk_count as u32,
            source_count: source_count as u32,
            updated_at,
        }
    }

    /// Write current state to disk. An absent index removes the artifacts.
    pub fn persist(&self) -> Result<(), AppError> {
        let _guard = self.write_guard.lock();
        let state = self.state.read();
        match state.as_ref() {
            Some(s) => self.store.write(&Snapshot {
                model: self.provider.model(),
                dims: self.provider.dims(),
                next_id: s.next_id,
                updated_at: &s.updated_at,
                entries: s.entries.iter().collect(),
            }),
            None => self.store.remove_all(),
        }
    }

    /// Drop all chunks and delete persisted artifacts.
    pub fn clear(&self) -> Result<(), AppError> {
        let _guard = self.write_guard.lock();
        self.store.remove_all()?;
        *self.state.write() = None;
        tracing::info!(path = %self.store.root().display(), "similarity index cleared");
        Ok(())
    }
}
