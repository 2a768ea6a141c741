use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use docqa_core::domain::Chunk;
use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::IndexEntry;

const VECTORS_MAGIC: &[u8; 4] = b"DQIX";
const FORMAT_VERSION: u32 = 2;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

const META_FILE: &str = "metadata.json";
const VECTORS_PREFIX: &str = "vectors-";
const VECTORS_SUFFIX: &str = ".bin";

/// Everything restored from (or written to) the index directory.
#[derive(Debug, Clone)]
pub(crate) struct PersistedIndex {
    pub model: String,
    pub dims: usize,
    pub next_id: u64,
    pub updated_at: String,
    pub entries: Vec<IndexEntry>,
}

/// Borrowed view handed to `write`, so persisting never clones the corpus.
pub(crate) struct Snapshot<'a> {
    pub model: &'a str,
    pub dims: usize,
    pub next_id: u64,
    pub updated_at: &'a str,
    pub entries: Vec<&'a IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    format_version: u32,
    /// Names the vector file this sidecar belongs to.
    generation: u64,
    model: String,
    dims: u32,
    next_id: u64,
    updated_at: String,
    entries: Vec<MetaEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaEntry {
    id: u64,
    source: String,
    content: String,
    text_sha256: String,
}

/// The two on-disk artifacts: a binary vector file and a JSON metadata sidecar.
///
/// The sidecar names the generation of its vector file, and renaming the
/// sidecar into place is the only commit point. A new vector file is written
/// under a fresh generation next to the committed one, so a write that fails
/// anywhere before the sidecar rename leaves the committed pair readable.
#[derive(Debug, Clone)]
pub(crate) struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn open(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn vectors_path(&self, generation: u64) -> PathBuf {
        self.root
            .join(format!("{VECTORS_PREFIX}{generation}{VECTORS_SUFFIX}"))
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    fn ensure_dirs(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.root).map_err(|e| {
            AppError::index("INDEX_WRITE_FAILED", "Failed to create index directory")
                .with_details(format!("path={}; err={}", self.root.display(), e))
        })
    }

    /// Generations of every vector file present, committed or stale.
    fn vector_generations(&self) -> Result<Vec<u64>, AppError> {
        let rd = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::index("INDEX_READ_FAILED", "Failed to list index directory")
                    .with_details(format!("path={}; err={}", self.root.display(), e)))
            }
        };
        let mut out = Vec::new();
        for entry in rd.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let generation = name
                .strip_prefix(VECTORS_PREFIX)
                .and_then(|rest| rest.strip_suffix(VECTORS_SUFFIX))
                .and_then(|g| g.parse::<u64>().ok());
            if let Some(g) = generation {
                out.push(g);
            }
        }
        Ok(out)
    }

    /// `Ok(None)` when either artifact is missing. Model or dimension
    /// mismatches and any inconsistency between the artifacts are errors.
    pub fn read(&self, model: &str, dims: usize) -> Result<Option<PersistedIndex>, AppError> {
        let meta_path = self.meta_path();
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta_bytes = fs::read(&meta_path).map_err(|e| {
            AppError::index("INDEX_READ_FAILED", "Failed to read index metadata")
                .with_details(format!("path={}; err={}", meta_path.display(), e))
        })?;
        let meta: MetaFile = serde_json::from_slice(&meta_bytes).map_err(|e| {
            AppError::index("INDEX_CORRUPT", "Failed to decode index metadata")
                .with_details(format!("path={}; err={}", meta_path.display(), e))
        })?;
        if meta.format_version != FORMAT_VERSION {
            return Err(AppError::index("INDEX_CORRUPT", "Unsupported index format version")
                .with_details(format!("version={}", meta.format_version)));
        }
        if meta.model != model || meta.dims as usize != dims {
            return Err(AppError::index(
                "INDEX_MODEL_MISMATCH",
                "Persisted index was built with a different embedding model",
            )
            .with_details(format!(
                "persisted_model={}; persisted_dims={}; model={model}; dims={dims}",
                meta.model, meta.dims
            )));
        }

        let vectors_path = self.vectors_path(meta.generation);
        if !vectors_path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&vectors_path).map_err(|e| {
            AppError::index("INDEX_READ_FAILED", "Failed to read index vectors")
                .with_details(format!("path={}; err={}", vectors_path.display(), e))
        })?;
        let vectors = decode_vectors(&raw, dims)?;
        if vectors.len() != meta.entries.len() {
            return Err(AppError::index("INDEX_CORRUPT", "Index artifacts disagree on entry count")
                .with_details(format!("vectors={}; metadata={}", vectors.len(), meta.entries.len())));
        }

        let mut seen = HashSet::with_capacity(vectors.len());
        let mut entries = Vec::with_capacity(vectors.len());
        for ((id, vector), m) in vectors.into_iter().zip(meta.entries) {
            if id != m.id || !seen.insert(id) || id >= meta.next_id {
                return Err(AppError::index("INDEX_CORRUPT", "Index entry ids are inconsistent")
                    .with_details(format!("vector_id={id}; metadata_id={}", m.id)));
            }
            let chunk = Chunk::new(m.content, m.source);
            if chunk.content_sha256() != m.text_sha256 {
                return Err(AppError::index("INDEX_CORRUPT", "Chunk content hash mismatch")
                    .with_details(format!("id={id}; source={}", chunk.source)));
            }
            entries.push(IndexEntry { id, chunk, vector });
        }

        Ok(Some(PersistedIndex {
            model: meta.model,
            dims,
            next_id: meta.next_id,
            updated_at: meta.updated_at,
            entries,
        }))
    }

    /// Stage both artifacts as `.tmp` files, move the vectors into a fresh
    /// generation, then commit by renaming the sidecar. Older vector files
    /// are removed once the commit has happened.
    pub fn write(&self, snap: &Snapshot<'_>) -> Result<(), AppError> {
        self.ensure_dirs()?;
        let generation = self.vector_generations()?.into_iter().max().map_or(1, |g| g + 1);

        let vectors = encode_vectors(snap)?;
        let meta = encode_meta(snap, generation)?;

        let vectors_path = self.vectors_path(generation);
        let vectors_tmp = vectors_path.with_extension("tmp");
        let meta_path = self.meta_path();
        let meta_tmp = meta_path.with_extension("tmp");

        let staged = stage(&vectors_tmp, &vectors, "index vectors")
            .and_then(|()| stage(&meta_tmp, &meta, "index metadata"))
            .and_then(|()| finalize(&vectors_tmp, &vectors_path, "index vectors"));
        if let Err(e) = staged {
            discard(&[vectors_tmp.as_path(), meta_tmp.as_path(), vectors_path.as_path()]);
            return Err(e);
        }
        if let Err(e) = finalize(&meta_tmp, &meta_path, "index metadata") {
            discard(&[meta_tmp.as_path(), vectors_path.as_path()]);
            return Err(e);
        }

        self.remove_stale_vectors(Some(generation));
        Ok(())
    }

    /// Delete both artifacts. Missing files are fine.
    ///
    /// Removing the sidecar is the commit point; once it is gone the index
    /// reads as absent and leftover vector files are only cleaned up.
    pub fn remove_all(&self) -> Result<(), AppError> {
        let meta_path = self.meta_path();
        match fs::remove_file(&meta_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::index("INDEX_CLEAR_FAILED", "Failed to delete index metadata")
                    .with_details(format!("path={}; err={}", meta_path.display(), e)))
            }
        }
        self.remove_stale_vectors(None);
        Ok(())
    }

    /// Best effort: drop every vector file except `keep`.
    fn remove_stale_vectors(&self, keep: Option<u64>) {
        let generations = match self.vector_generations() {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(err = %e, "could not list stale index vectors");
                return;
            }
        };
        for g in generations.into_iter().filter(|g| Some(*g) != keep) {
            let path = self.vectors_path(g);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), err = %e, "failed to remove stale index vectors");
            }
        }
    }
}

fn encode_vectors(snap: &Snapshot<'_>) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::with_capacity(HEADER_LEN + snap.entries.len() * (8 + 4 * snap.dims));
    buf.extend_from_slice(VECTORS_MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(snap.dims as u32).to_le_bytes());
    buf.extend_from_slice(&(snap.entries.len() as u64).to_le_bytes());
    for e in snap.entries.iter() {
        if e.vector.len() != snap.dims {
            return Err(AppError::index(
                "INDEX_WRITE_FAILED",
                "Refusing to persist a vector of the wrong dimension",
            )
            .with_details(format!("id={}; expected={}; got={}", e.id, snap.dims, e.vector.len())));
        }
        buf.extend_from_slice(&e.id.to_le_bytes());
        for x in e.vector.iter() {
            buf.extend_from_slice(&x.to_le_bytes());
        }
    }
    Ok(buf)
}

fn encode_meta(snap: &Snapshot<'_>, generation: u64) -> Result<Vec<u8>, AppError> {
    let meta = MetaFile {
        format_version: FORMAT_VERSION,
        generation,
        model: snap.model.to_string(),
        dims: snap.dims as u32,
        next_id: snap.next_id,
        updated_at: snap.updated_at.to_string(),
        entries: snap
            .entries
            .iter()
            .map(|e| MetaEntry {
                id: e.id,
                source: e.chunk.source.clone(),
                content: e.chunk.content.clone(),
                text_sha256: e.chunk.content_sha256(),
            })
            .collect(),
    };
    serde_json::to_vec_pretty(&meta).map_err(|e| {
        AppError::index("INDEX_WRITE_FAILED", "Failed to encode index metadata")
            .with_details(e.to_string())
    })
}

fn stage(tmp: &Path, bytes: &[u8], what: &str) -> Result<(), AppError> {
    fs::write(tmp, bytes).map_err(|e| {
        AppError::index("INDEX_WRITE_FAILED", format!("Failed to write {what}"))
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })
}

fn finalize(tmp: &Path, dest: &Path, what: &str) -> Result<(), AppError> {
    fs::rename(tmp, dest).map_err(|e| {
        AppError::index("INDEX_WRITE_FAILED", format!("Failed to finalize {what} write"))
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), dest.display(), e))
    })
}

/// Remove uncommitted files after a failed write. Only plain files are touched.
fn discard(paths: &[&Path]) {
    for path in paths {
        if path.is_file() {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), err = %e, "failed to clean up uncommitted index file");
            }
        }
    }
}

fn decode_vectors(raw: &[u8], dims: usize) -> Result<Vec<(u64, Vec<f32>)>, AppError> {
    let corrupt = |why: &str| AppError::index("INDEX_CORRUPT", "Index vector file is corrupt").with_details(why.to_string());

    if raw.len() < HEADER_LEN || &raw[..4] != VECTORS_MAGIC {
        return Err(corrupt("bad header"));
    }
    let version = u32::from_le_bytes(le_array(&raw[4..8]));
    let file_dims = u32::from_le_bytes(le_array(&raw[8..12])) as usize;
    let count = u64::from_le_bytes(le_array(&raw[12..20]));
    if version != FORMAT_VERSION {
        return Err(corrupt("unsupported version"));
    }
    if file_dims != dims {
        return Err(corrupt("dimension differs from metadata"));
    }

    let record_len = 8 + 4 * dims;
    let expected = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(record_len))
        .and_then(|n| n.checked_add(HEADER_LEN));
    if expected != Some(raw.len()) {
        return Err(corrupt("length does not match entry count"));
    }

    let mut out = Vec::with_capacity(count as usize);
    for record in raw[HEADER_LEN..].chunks_exact(record_len) {
        let id = u64::from_le_bytes(le_array(&record[..8]));
        let vector = record[8..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes(le_array(b)))
            .collect::<Vec<_>>();
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(corrupt("non-finite component"));
        }
        out.push((id, vector));
    }
    Ok(out)
}

/// Copy a slice of known length into a fixed array.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
