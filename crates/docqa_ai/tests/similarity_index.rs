use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use docqa_ai::embeddings::{Embedder, EmbeddingProvider};
use docqa_ai::index::SimilarityIndex;
use docqa_core::config::DEFAULT_RELEVANCE_THRESHOLD;
use docqa_core::domain::Chunk;
use docqa_core::error::{AppError, ErrorKind};
use pretty_assertions::assert_eq;

const VOCAB: &[&str] = &["sky", "blue", "color", "yellow", "banana", "ocean", "water"];

/// One dimension per vocabulary word plus a constant bias dimension.
/// Inputs containing "explode" fail like a crashed model.
struct KeywordEmbedder {
    calls: Arc<AtomicUsize>,
}

impl Embedder for KeywordEmbedder {
    fn embed(&self, _model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if inputs.iter().any(|t| t.contains("explode")) {
            return Err(AppError::embedding("EMBEDDINGS_FAILED", "model crashed"));
        }
        Ok(inputs
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; VOCAB.len() + 1];
                v[VOCAB.len()] = 1.0;
                for token in text.split(|c: char| !c.is_alphanumeric()) {
                    let token = token.to_lowercase();
                    if let Some(i) = VOCAB.iter().position(|w| *w == token) {
                        v[i] += 1.0;
                    }
                }
                v
            })
            .collect())
    }
}

fn provider(model: &str, calls: &Arc<AtomicUsize>) -> Arc<EmbeddingProvider> {
    let backend = Arc::new(KeywordEmbedder {
        calls: Arc::clone(calls),
    });
    Arc::new(EmbeddingProvider::load(model, backend).expect("load provider"))
}

fn open(dir: &Path, model: &str, calls: &Arc<AtomicUsize>) -> SimilarityIndex {
    SimilarityIndex::open(dir.to_path_buf(), provider(model, calls), DEFAULT_RELEVANCE_THRESHOLD)
}

fn sources(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn vector_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|rd| {
            rd.flatten()
                .map(|e| e.path())
                .filter(|p| p.extension().map(|x| x == "bin").unwrap_or(false))
                .collect()
        })
        .unwrap_or_default()
}

/// A directory where the sidecar is staged makes every later write fail.
fn block_writes(dir: &Path) -> PathBuf {
    let blocker = dir.join("metadata.tmp");
    fs::create_dir(&blocker).expect("block writes");
    blocker
}

#[test]
fn inserted_chunk_is_found_by_a_related_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    assert!(index.is_empty());

    let added = index
        .insert(&[
            Chunk::new("The sky is blue", "doc1"),
            Chunk::new("Bananas are yellow fruit", "doc2"),
        ])
        .expect("insert");
    assert_eq!(added, 2);
    assert!(!index.is_empty());

    let hits = index.search("sky color", 1).expect("search");
    assert_eq!(hits, vec![Chunk::new("The sky is blue", "doc1")]);
}

#[test]
fn removing_a_source_leaves_only_the_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index
        .insert(&[
            Chunk::new("The sky is blue", "doc1"),
            Chunk::new("Ocean water is blue", "doc1"),
            Chunk::new("Bananas are yellow", "doc2"),
        ])
        .expect("insert");
    let embeds_before = calls.load(Ordering::SeqCst);

    let removed = index.remove_by_source("doc1").expect("remove");
    assert_eq!(removed, 2);
    assert_eq!(index.list_sources(), sources(&["doc2"]));
    // Rebuild reuses stored vectors.
    assert_eq!(calls.load(Ordering::SeqCst), embeds_before);

    let hits = index.search("blue sky", 5).expect("search");
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|c| c.source == "doc2"));

    // The rebuilt state is what was persisted.
    let reopened = open(dir.path(), "kw", &calls);
    assert_eq!(reopened.list_sources(), sources(&["doc2"]));
    assert_eq!(reopened.len(), 1);
}

#[test]
fn removing_an_absent_source_changes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index.insert(&[Chunk::new("The sky is blue", "doc1")]).expect("insert");

    let before = index.list_sources();
    let meta_before = fs::read(dir.path().join("metadata.json")).expect("read metadata");

    assert_eq!(index.remove_by_source("nope").expect("remove"), 0);
    assert_eq!(index.list_sources(), before);
    assert_eq!(fs::read(dir.path().join("metadata.json")).expect("read metadata"), meta_before);
}

#[test]
fn removing_the_last_source_returns_to_absent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index.insert(&[Chunk::new("The sky is blue", "doc1")]).expect("insert");

    assert_eq!(index.remove_by_source("doc1").expect("remove"), 1);
    assert!(index.is_empty());
    assert!(index.list_sources().is_empty());
    assert!(vector_files(dir.path()).is_empty());
    assert!(!dir.path().join("metadata.json").exists());
    assert!(index.search("sky", 3).expect("search").is_empty());
}

#[test]
fn loading_twice_yields_the_same_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let index = open(dir.path(), "kw", &calls);
        index
            .insert(&[Chunk::new("The sky is blue", "doc1"), Chunk::new("Yellow banana", "doc2")])
            .expect("insert");
        index.insert(&[Chunk::new("Ocean water", "doc3")]).expect("insert");
    }

    let first = open(dir.path(), "kw", &calls);
    let second = open(dir.path(), "kw", &calls);
    assert_eq!(first.list_sources(), sources(&["doc1", "doc2", "doc3"]));
    assert_eq!(first.list_sources(), second.list_sources());

    first.load();
    assert_eq!(first.list_sources(), second.list_sources());
}

#[test]
fn corrupt_artifacts_start_empty_and_accept_new_chunks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    open(dir.path(), "kw", &calls)
        .insert(&[Chunk::new("The sky is blue", "doc1")])
        .expect("insert");
    for path in vector_files(dir.path()) {
        fs::write(path, b"not an index").expect("corrupt");
    }

    let index = open(dir.path(), "kw", &calls);
    assert!(index.is_empty());
    assert!(index.list_sources().is_empty());

    index.insert(&[Chunk::new("Yellow banana", "doc2")]).expect("insert");
    assert_eq!(open(dir.path(), "kw", &calls).list_sources(), sources(&["doc2"]));
}

#[test]
fn missing_sidecar_starts_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    open(dir.path(), "kw", &calls)
        .insert(&[Chunk::new("The sky is blue", "doc1")])
        .expect("insert");
    fs::remove_file(dir.path().join("metadata.json")).expect("remove sidecar");

    assert!(open(dir.path(), "kw", &calls).is_empty());
}

#[test]
fn index_built_with_another_model_is_not_loaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    open(dir.path(), "kw", &calls)
        .insert(&[Chunk::new("The sky is blue", "doc1")])
        .expect("insert");

    assert!(open(dir.path(), "other-model", &calls).is_empty());
    assert!(!open(dir.path(), "kw", &calls).is_empty());
}

#[test]
fn search_falls_back_to_nearest_when_threshold_excludes_everything() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = SimilarityIndex::open(dir.path().to_path_buf(), provider("kw", &calls), -1.0);
    index
        .insert(&[
            Chunk::new("The sky is blue", "doc1"),
            Chunk::new("Yellow banana", "doc2"),
            Chunk::new("Ocean water", "doc3"),
        ])
        .expect("insert");

    let hits = index.search("sky", 2).expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].source, "doc1");
}

#[test]
fn threshold_drops_distant_candidates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    // Exact keyword match is distance 0; anything sharing only the bias is far.
    let index = SimilarityIndex::open(dir.path().to_path_buf(), provider("kw", &calls), 0.1);
    index
        .insert(&[Chunk::new("sky", "doc1"), Chunk::new("banana", "doc2"), Chunk::new("ocean", "doc3")])
        .expect("insert");

    let hits = index.search("sky", 3).expect("search");
    assert_eq!(hits, vec![Chunk::new("sky", "doc1")]);
}

#[test]
fn scored_search_is_nearest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index
        .insert(&[
            Chunk::new("Yellow banana", "doc2"),
            Chunk::new("The sky is blue", "doc1"),
            Chunk::new("blue sky blue", "doc3"),
        ])
        .expect("insert");

    let scored = index.search_with_scores("blue sky", 3).expect("search");
    assert_eq!(scored.len(), 3);
    assert!(scored.windows(2).all(|w| w[0].1 <= w[1].1));
    assert_eq!(scored[0].0.source, "doc1");
    assert_eq!(scored[2].0.source, "doc2");
}

#[test]
fn empty_index_search_does_not_embed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    let after_warmup = calls.load(Ordering::SeqCst);

    assert!(index.search("anything", 5).expect("search").is_empty());
    assert!(index.list_sources().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), after_warmup);
}

#[test]
fn clear_drops_state_and_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index.insert(&[Chunk::new("The sky is blue", "doc1")]).expect("insert");
    assert!(index.status().ready);

    index.clear().expect("clear");
    assert!(index.is_empty());
    assert!(!index.status().ready);
    assert!(vector_files(dir.path()).is_empty());
    assert!(open(dir.path(), "kw", &calls).is_empty());
}

#[test]
fn status_reports_counts_and_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index
        .insert(&[
            Chunk::new("The sky is blue", "doc1"),
            Chunk::new("Ocean water", "doc1"),
            Chunk::new("Yellow banana", "doc2"),
        ])
        .expect("insert");

    let st = index.status();
    assert_eq!(st.chunk_count, 3);
    assert_eq!(st.source_count, 2);
    assert_eq!(st.model, "kw");
    assert_eq!(st.dims as usize, VOCAB.len() + 1);
    assert!(st.updated_at.is_some());
}

#[test]
fn failed_insert_write_keeps_memory_and_disk_at_the_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index.insert(&[Chunk::new("The sky is blue", "doc1")]).expect("insert");

    let blocker = block_writes(dir.path());
    let err = index.insert(&[Chunk::new("Yellow banana", "doc2")]).unwrap_err();
    assert_eq!(err.code, "INDEX_WRITE_FAILED");
    assert_eq!(index.list_sources(), sources(&["doc1"]));
    assert_eq!(index.len(), 1);

    let reopened = open(dir.path(), "kw", &calls);
    assert_eq!(reopened.list_sources(), sources(&["doc1"]));
    assert_eq!(reopened.len(), 1);
    assert_eq!(vector_files(dir.path()).len(), 1);

    // Once the path is clear the same insert goes through.
    fs::remove_dir(&blocker).expect("unblock");
    index.insert(&[Chunk::new("Yellow banana", "doc2")]).expect("insert");
    assert_eq!(open(dir.path(), "kw", &calls).list_sources(), sources(&["doc1", "doc2"]));
    assert_eq!(vector_files(dir.path()).len(), 1);
}

#[test]
fn failed_insert_embedding_applies_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index.insert(&[Chunk::new("The sky is blue", "doc1")]).expect("insert");
    let meta_before = fs::read(dir.path().join("metadata.json")).expect("read metadata");

    let err = index
        .insert(&[
            Chunk::new("Yellow banana", "doc2"),
            Chunk::new("this will explode", "doc2"),
        ])
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Embedding);
    assert_eq!(index.list_sources(), sources(&["doc1"]));
    assert_eq!(index.len(), 1);

    assert_eq!(fs::read(dir.path().join("metadata.json")).expect("read metadata"), meta_before);
    assert_eq!(open(dir.path(), "kw", &calls).list_sources(), sources(&["doc1"]));
}

#[test]
fn failed_removal_write_keeps_memory_and_disk_at_the_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(AtomicUsize::new(0));
    let index = open(dir.path(), "kw", &calls);
    index
        .insert(&[Chunk::new("The sky is blue", "doc1"), Chunk::new("Yellow banana", "doc2")])
        .expect("insert");

    let _blocker = block_writes(dir.path());
    let err = index.remove_by_source("doc1").unwrap_err();
    assert_eq!(err.code, "INDEX_WRITE_FAILED");
    assert_eq!(index.list_sources(), sources(&["doc1", "doc2"]));
    assert_eq!(index.len(), 2);

    let reopened = open(dir.path(), "kw", &calls);
    assert_eq!(reopened.list_sources(), sources(&["doc1", "doc2"]));
    assert_eq!(reopened.len(), 2);
}
