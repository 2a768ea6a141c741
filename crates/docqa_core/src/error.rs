use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure class, fixed where the failure happens.
///
/// Callers branch on this instead of inspecting message text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Document fetch or parse failed.
    Load,
    /// Embedding model unavailable, crashed, or returned unusable vectors.
    Embedding,
    /// Index storage read/write failed or persisted state is corrupt.
    Index,
    /// External text generation failed (network, auth, rate limit).
    Generation,
    /// Input rejected before any mutation.
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Load => "load",
            ErrorKind::Embedding => "embedding",
            ErrorKind::Index => "index",
            ErrorKind::Generation => "generation",
            ErrorKind::Validation => "validation",
        }
    }
}

/// Single structured error shape shared by every layer of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn load(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Load, code, message)
    }

    pub fn embedding(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Embedding, code, message)
    }

    pub fn index(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, code, message)
    }

    pub fn generation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generation, code, message)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(d) = self.details.as_deref() {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
