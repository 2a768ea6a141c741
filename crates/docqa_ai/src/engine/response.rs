use std::collections::HashSet;

use docqa_core::domain::{source_basename, Chunk};
use docqa_core::error::AppError;
use regex::Regex;

/// Cleans raw model output into the rich-text answer shown to users.
#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    think: Regex,
    bold: Regex,
    star_italic: Regex,
    underscore_italic: Regex,
}

fn compile(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern).map_err(|e| {
        AppError::validation("RESPONSE_PATTERN_INVALID", "Failed to compile response pattern")
            .with_details(format!("pattern={pattern}; err={e}"))
    })
}

impl ResponseFormatter {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            think: compile(r"(?s)<think>.*?</think>")?,
            bold: compile(r"\*\*(.*?)\*\*")?,
            star_italic: compile(r"\*([^*\n]+?)\*")?,
            underscore_italic: compile(r"\b_([^_\n]+?)_\b")?,
        })
    }

    /// Drop `<think>...</think>` blocks emitted by reasoning models.
    pub fn strip_reasoning(&self, raw: &str) -> String {
        self.think.replace_all(raw, "").trim().to_string()
    }

    /// Residual markdown emphasis to `<strong>`/`<em>`.
    pub fn markdown_to_html(&self, text: &str) -> String {
        // Bold first so its asterisks are gone before single-star matching.
        let text = self.bold.replace_all(text, "<strong>${1}</strong>");
        let text = self.star_italic.replace_all(&text, "<em>${1}</em>");
        self.underscore_italic.replace_all(&text, "<em>${1}</em>").into_owned()
    }

    pub fn finish(&self, raw: &str, sources: &[String]) -> String {
        let cleaned = self.strip_reasoning(raw);
        with_source_footer(self.markdown_to_html(&cleaned), sources)
    }
}

/// Distinct sources in first-seen order, path-like ones reduced to basenames.
pub fn source_labels(chunks: &[Chunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in chunks {
        let label = source_basename(&c.source);
        if seen.insert(label) {
            out.push(label.to_string());
        }
    }
    out
}

pub fn with_source_footer(mut answer: String, sources: &[String]) -> String {
    if !sources.is_empty() {
        answer.push_str(&format!("\n---<em>Based on: {}</em>", sources.join(", ")));
    }
    answer
}
