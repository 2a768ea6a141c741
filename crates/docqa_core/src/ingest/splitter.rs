//! Recursive character splitter.
//!
//! Text is split on the first separator that occurs in it, then the pieces are
//! greedily merged back up to `chunk_size` characters, carrying up to
//! `chunk_overlap` characters of trailing pieces into the next chunk. Pieces
//! still larger than `chunk_size` are split again with the next separator.
//! Lengths are counted in chars, not bytes.

use crate::domain::{Chunk, Document};

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1089,
            chunk_overlap: 108,
        }
    }
}

pub fn split_documents(docs: &[Document], cfg: SplitterConfig) -> Vec<Chunk> {
    let mut out = Vec::new();
    for doc in docs {
        for piece in split_text(&doc.content, cfg) {
            out.push(Chunk::new(piece, doc.source.clone()));
        }
    }
    out
}

pub fn split_text(text: &str, cfg: SplitterConfig) -> Vec<String> {
    let cfg = SplitterConfig {
        chunk_size: cfg.chunk_size.max(1),
        chunk_overlap: cfg.chunk_overlap.min(cfg.chunk_size.saturating_sub(1)),
    };
    split_recursive(text, SEPARATORS, cfg)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(text: &str, separators: &[&str], cfg: SplitterConfig) -> Vec<String> {
    let (sep_idx, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, s)| s.is_empty() || text.contains(**s))
        .map(|(i, s)| (i, *s))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let remaining = &separators[(sep_idx + 1).min(separators.len())..];

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut out = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < cfg.chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            out.extend(merge_pieces(&pending, separator, cfg));
            pending.clear();
        }
        if remaining.is_empty() {
            out.push(piece);
        } else {
            out.extend(split_recursive(&piece, remaining, cfg));
        }
    }
    if !pending.is_empty() {
        out.extend(merge_pieces(&pending, separator, cfg));
    }
    out
}

fn merge_pieces(pieces: &[String], separator: &str, cfg: SplitterConfig) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { sep_len };
        if total + len + joiner > cfg.chunk_size && !current.is_empty() {
            push_joined(&mut chunks, &current, separator);
            // Drop from the front until what is left fits as overlap and leaves room.
            while !current.is_empty() {
                let over_budget = total + len + sep_len > cfg.chunk_size;
                if total <= cfg.chunk_overlap && !(total > 0 && over_budget) {
                    break;
                }
                let tail_sep = if current.len() > 1 { sep_len } else { 0 };
                total = total.saturating_sub(char_len(current[0]) + tail_sep);
                current.remove(0);
            }
        }
        let joiner = if current.is_empty() { 0 } else { sep_len };
        current.push(piece.as_str());
        total += len + joiner;
    }
    push_joined(&mut chunks, &current, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, parts: &[&str], separator: &str) {
    let joined = parts.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
