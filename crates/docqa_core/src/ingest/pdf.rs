use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::domain::Document;
use crate::error::AppError;

use super::DocumentLoader;

/// Extracts the text layer of a PDF file as a single document.
#[derive(Debug, Clone, Default)]
pub struct PdfLoader;

impl PdfLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentLoader for PdfLoader {
    fn load(&self, locator: &str) -> Result<Vec<Document>, AppError> {
        let path = Path::new(locator);
        if !path.is_file() {
            return Err(AppError::load("LOAD_PDF_FAILED", "PDF file not found")
                .with_details(format!("path={}", path.display())));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            AppError::load("LOAD_PDF_FAILED", "Failed to read PDF file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let text = extract_guarded(path, || pdf_extract::extract_text_from_mem(&bytes))?;
        if text.trim().is_empty() {
            return Err(AppError::load("LOAD_PDF_EMPTY", "PDF contains no extractable text")
                .with_details(format!("path={}", path.display())));
        }
        tracing::debug!(path = %path.display(), chars = text.len(), "extracted pdf text");
        Ok(vec![Document {
            content: text,
            source: locator.to_string(),
        }])
    }
}

/// Runs an extractor, turning both its error and any panic into a load error.
///
/// The PDF parser panics on some malformed inputs instead of returning an error.
fn extract_guarded<F, E>(path: &Path, extract: F) -> Result<String, AppError>
where
    F: FnOnce() -> Result<String, E>,
    E: Display,
{
    match catch_unwind(AssertUnwindSafe(extract)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(AppError::load("LOAD_PDF_FAILED", "Failed to extract text from PDF")
            .with_details(format!("path={}; err={}", path.display(), e))),
        Err(_) => {
            tracing::warn!(path = %path.display(), "pdf text extraction panicked");
            Err(AppError::load("LOAD_PDF_FAILED", "PDF text extraction panicked")
                .with_details(format!("path={}", path.display())))
        }
    }
}
