use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::AppError;

/// Loader output before splitting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub source: String,
}

/// A bounded slice of source text plus its origin (URL or file path).
///
/// `source` scopes dedup and deletion. The embedding lives in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub source: String,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }

    pub fn content_sha256(&self) -> String {
        sha256_hex(self.content.as_bytes())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// One question/answer turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exchange {
    pub sequence_number: u64,
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub recorded_at: String, // RFC3339
}

/// Display row for an ingested source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub short: String,
}

const URL_PREVIEW_CHARS: usize = 50;

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Last path component for path-like sources; anything else is returned as is.
pub fn source_basename(source: &str) -> &str {
    if !source.contains('/') && !source.contains('\\') {
        return source;
    }
    source.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(source)
}

impl SourceEntry {
    /// URLs keep the full URL as `name` and a preview as `short`; files show
    /// their basename and keep the full path as `short`.
    pub fn from_source(source: &str) -> Self {
        if is_url(source) {
            let mut short: String = source.chars().take(URL_PREVIEW_CHARS).collect();
            if source.chars().count() > URL_PREVIEW_CHARS {
                short.push_str("...");
            }
            Self {
                name: source.to_string(),
                short,
            }
        } else {
            Self {
                name: source_basename(source).to_string(),
                short: source.to_string(),
            }
        }
    }
}

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc().format(&Rfc3339).map_err(|e| {
        AppError::validation("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basename_handles_both_separators() {
        assert_eq!(source_basename("/data/uploads/report.pdf"), "report.pdf");
        assert_eq!(source_basename("C:\\uploads\\report.pdf"), "report.pdf");
        assert_eq!(source_basename("doc1"), "doc1");
    }

    #[test]
    fn url_entries_are_previewed() {
        let long = format!("https://example.com/{}", "x".repeat(80));
        let e = SourceEntry::from_source(&long);
        assert_eq!(e.name, long);
        assert_eq!(e.short.chars().count(), URL_PREVIEW_CHARS + 3);
        assert!(e.short.ends_with("..."));

        let short = SourceEntry::from_source("https://example.com/a");
        assert_eq!(short.short, "https://example.com/a");
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let c = Chunk::new("abc", "doc1");
        assert_eq!(
            c.content_sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_entries_show_basename() {
        let e = SourceEntry::from_source("uploads/manual.pdf");
        assert_eq!(e.name, "manual.pdf");
        assert_eq!(e.short, "uploads/manual.pdf");
    }
}
