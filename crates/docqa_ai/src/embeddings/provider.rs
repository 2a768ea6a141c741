use std::collections::HashMap;
use std::sync::Arc;

use docqa_core::error::AppError;
use parking_lot::Mutex;

use super::Embedder;

const WARMUP_TEXT: &str = "embedding model warmup";

/// A loaded embedding model: L2-normalized vectors of one fixed dimension.
///
/// With unit vectors, squared Euclidean distance is `2 - 2 * cosine`, so
/// nearest-by-distance equals most-similar-by-cosine.
pub struct EmbeddingProvider {
    model: String,
    dims: usize,
    backend: Arc<dyn Embedder>,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("model", &self.model)
            .field("dims", &self.dims)
            .finish()
    }
}

impl EmbeddingProvider {
    /// Load `model` through `backend` by embedding a warmup text.
    ///
    /// Any failure here is fatal to construction.
    pub fn load(model: &str, backend: Arc<dyn Embedder>) -> Result<Self, AppError> {
        let warmup = backend.embed(model, &[WARMUP_TEXT]).map_err(|e| {
            AppError::embedding("EMBEDDING_MODEL_LOAD_FAILED", "Failed to load embedding model")
                .with_details(format!("model={model}; err={e}"))
                .with_retryable(e.retryable)
        })?;
        let dims = warmup.first().map(Vec::len).unwrap_or(0);
        if dims == 0 {
            return Err(AppError::embedding(
                "EMBEDDING_MODEL_LOAD_FAILED",
                "Embedding model returned an empty vector",
            )
            .with_details(format!("model={model}")));
        }
        tracing::info!(model, dims, "loaded embedding model");
        Ok(Self {
            model: model.to_string(),
            dims,
            backend,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.backend.embed(&self.model, texts)?;
        if raw.len() != texts.len() {
            return Err(AppError::embedding(
                "EMBEDDINGS_FAILED",
                "Embedding count does not match input count",
            )
            .with_details(format!("expected={}; got={}", texts.len(), raw.len())));
        }
        raw.into_iter()
            .enumerate()
            .map(|(i, mut v)| {
                if v.len() != self.dims {
                    return Err(AppError::embedding(
                        "EMBEDDINGS_DIMS_MISMATCH",
                        "Embedding dimension does not match the loaded model",
                    )
                    .with_details(format!(
                        "model={}; expected={}; got={}; input={i}",
                        self.model,
                        self.dims,
                        v.len()
                    )));
                }
                l2_normalize(&mut v).map_err(|e| e.with_details(format!("input={i}")))?;
                Ok(v)
            })
            .collect()
    }

    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>, AppError> {
        self.embed(&[text])?.pop().ok_or_else(|| {
            AppError::embedding("EMBEDDINGS_FAILED", "Embedding response was empty")
        })
    }
}

/// Scale `v` to unit length in place.
pub fn l2_normalize(v: &mut [f32]) -> Result<(), AppError> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(AppError::embedding(
            "EMBEDDINGS_INVALID",
            "Embedding contains non-finite values",
        ));
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(AppError::embedding("EMBEDDINGS_INVALID", "Embedding norm is zero"));
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

/// Process-scoped registry of loaded models, keyed by model name.
///
/// Created once at startup and handed to whatever needs embeddings; a model
/// is loaded at most once for the lifetime of the cache.
#[derive(Default)]
pub struct EmbeddingCache {
    providers: Mutex<HashMap<String, Arc<EmbeddingProvider>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached provider for `model`, loading it with the backend
    /// from `make_backend` on first use. Failed loads are not cached.
    pub fn get_or_load<F>(&self, model: &str, make_backend: F) -> Result<Arc<EmbeddingProvider>, AppError>
    where
        F: FnOnce() -> Result<Arc<dyn Embedder>, AppError>,
    {
        // Held across the load so concurrent callers cannot load the same model twice.
        let mut providers = self.providers.lock();
        if let Some(p) = providers.get(model) {
            tracing::debug!(model, "using cached embedding model");
            return Ok(Arc::clone(p));
        }
        let backend = make_backend()?;
        let provider = Arc::new(EmbeddingProvider::load(model, backend)?);
        providers.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.providers.lock().contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.providers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.lock().is_empty()
    }

    /// Drop every cached model (process shutdown).
    pub fn clear(&self) {
        let mut providers = self.providers.lock();
        let n = providers.len();
        providers.clear();
        tracing::debug!(models = n, "embedding cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: Arc<AtomicUsize>,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, _model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect())
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn embed(&self, _model: &str, _inputs: &[&str]) -> Result<Vec<Vec<f32>>, AppError> {
            Err(AppError::embedding("EMBEDDINGS_FAILED", "backend down"))
        }
    }

    #[test]
    fn vectors_are_unit_length() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = EmbeddingProvider::load("m", Arc::new(CountingEmbedder { calls })).expect("load");
        assert_eq!(p.dims(), 3);
        let v = p.embed_one("hello").expect("embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cache_loads_each_model_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = EmbeddingCache::new();
        let mut constructed = 0;
        for _ in 0..3 {
            cache
                .get_or_load("m", || {
                    constructed += 1;
                    Ok(Arc::new(CountingEmbedder {
                        calls: Arc::clone(&calls),
                    }) as Arc<dyn Embedder>)
                })
                .expect("load");
        }
        assert_eq!(constructed, 1);
        // Only the warmup ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("m"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn load_failure_propagates_and_is_not_cached() {
        let cache = EmbeddingCache::new();
        let err = cache
            .get_or_load("m", || Ok(Arc::new(BrokenEmbedder) as Arc<dyn Embedder>))
            .unwrap_err();
        assert_eq!(err.code, "EMBEDDING_MODEL_LOAD_FAILED");
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_vectors_are_rejected() {
        let mut v = vec![0.0, 0.0];
        assert!(l2_normalize(&mut v).is_err());
    }
}
