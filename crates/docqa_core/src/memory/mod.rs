//! Bounded conversational history.
//!
//! A FIFO window of the most recent exchanges: inserting at capacity evicts
//! the oldest exchange regardless of how often it was read.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::domain::{now_rfc3339_utc, Exchange};

pub const DEFAULT_CAPACITY: usize = 10;

/// Answers longer than this are cut in the rendered transcript.
pub const ANSWER_PREVIEW_CHARS: usize = 150;

/// Follow-up cues. Single words match whole tokens; phrases match token runs.
const FOLLOW_UP_CUES: &[&str] = &[
    "it",
    "that",
    "this",
    "they",
    "them",
    "tell me more",
    "what about",
];

/// Questions with at most this many tokens are treated as follow-ups.
const SHORT_QUESTION_TOKENS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_exchanges: usize,
    pub capacity: usize,
    pub has_context: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    capacity: usize,
    exchanges: VecDeque<Exchange>,
    next_sequence: u64,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ConversationMemory {
    /// A zero capacity is raised to one so the window can hold the latest turn.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            exchanges: VecDeque::with_capacity(capacity),
            next_sequence: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Append an exchange stamped with the current time and return its
    /// sequence number.
    pub fn add_exchange(&mut self, question: &str, answer: &str, sources: &[String]) -> u64 {
        let recorded_at = match now_rfc3339_utc() {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(err = %e, "could not timestamp exchange; recording it without one");
                String::new()
            }
        };
        self.add_exchange_at(question, answer, sources, recorded_at)
    }

    /// Append an exchange with an explicit timestamp.
    ///
    /// Sources are deduplicated keeping first-seen order.
    pub fn add_exchange_at(
        &mut self,
        question: &str,
        answer: &str,
        sources: &[String],
        recorded_at: String,
    ) -> u64 {
        let mut unique: Vec<String> = Vec::with_capacity(sources.len());
        for s in sources {
            if !unique.contains(s) {
                unique.push(s.clone());
            }
        }

        let sequence_number = self.next_sequence;
        self.next_sequence += 1;

        while self.exchanges.len() >= self.capacity {
            self.exchanges.pop_front();
        }
        self.exchanges.push_back(Exchange {
            sequence_number,
            question: question.to_string(),
            answer: answer.to_string(),
            sources: unique,
            recorded_at,
        });
        tracing::debug!(sequence_number, retained = self.exchanges.len(), "added exchange");
        sequence_number
    }

    /// Transcript of up to `last_n` recent exchanges (`0` means all retained).
    ///
    /// Empty when there is no prior turn to reference.
    pub fn get_context(&self, last_n: usize) -> String {
        if self.exchanges.is_empty() {
            return String::new();
        }
        let take = if last_n == 0 {
            self.exchanges.len()
        } else {
            last_n.min(self.exchanges.len())
        };
        let skip = self.exchanges.len() - take;

        let mut lines = vec!["Previous conversation:".to_string()];
        for ex in self.exchanges.iter().skip(skip) {
            lines.push(format!("Q: {}", ex.question));
            lines.push(format!("A: {}", answer_preview(&ex.answer)));
        }
        let mut out = lines.join("\n");
        out.push_str("\n---");
        out
    }

    /// Best-effort guess that `question` leans on prior turns.
    ///
    /// True when the question contains a deictic/anaphoric cue or is at most
    /// five tokens long. Always false with no history.
    pub fn is_follow_up(&self, question: &str) -> bool {
        if self.exchanges.is_empty() {
            return false;
        }
        if question.split_whitespace().count() <= SHORT_QUESTION_TOKENS {
            return true;
        }
        let tokens = cue_tokens(question);
        FOLLOW_UP_CUES.iter().any(|cue| {
            let cue_tokens: Vec<&str> = cue.split(' ').collect();
            tokens
                .windows(cue_tokens.len())
                .any(|w| w.iter().zip(cue_tokens.iter()).all(|(a, b)| a == b))
        })
    }

    /// The most recent `limit` questions, oldest first (`0` means all retained).
    pub fn recent_questions(&self, limit: usize) -> Vec<String> {
        let take = if limit == 0 {
            self.exchanges.len()
        } else {
            limit.min(self.exchanges.len())
        };
        let skip = self.exchanges.len() - take;
        self.exchanges
            .iter()
            .skip(skip)
            .map(|e| e.question.clone())
            .collect()
    }

    pub fn history(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }

    /// Drop every exchange. Sequence numbers keep increasing afterwards.
    pub fn clear(&mut self) {
        self.exchanges.clear();
        tracing::info!("chat history cleared");
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_exchanges: self.exchanges.len(),
            capacity: self.capacity,
            has_context: !self.exchanges.is_empty(),
        }
    }
}

fn answer_preview(answer: &str) -> String {
    if answer.chars().count() <= ANSWER_PREVIEW_CHARS {
        return answer.to_string();
    }
    let mut s: String = answer.chars().take(ANSWER_PREVIEW_CHARS).collect();
    s.push_str("...");
    s
}

/// Lowercased whitespace tokens with surrounding punctuation removed.
fn cue_tokens(question: &str) -> Vec<String> {
    question
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        let answer = "é".repeat(200);
        let p = answer_preview(&answer);
        assert_eq!(p.chars().count(), ANSWER_PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn cue_tokens_strip_punctuation() {
        assert_eq!(cue_tokens("What about IT?"), vec!["what", "about", "it"]);
    }

    #[test]
    fn cue_words_do_not_match_inside_longer_words() {
        let mut m = ConversationMemory::new(3);
        m.add_exchange("q", "a", &[]);
        assert!(!m.is_follow_up("Summarize the with statement semantics described in chapter four"));
        assert!(m.is_follow_up("Could you explain how they measured the rainfall totals last year"));
    }
}
