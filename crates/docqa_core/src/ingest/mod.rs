pub mod pdf;
pub mod splitter;
pub mod web;

use std::collections::BTreeSet;

use crate::domain::{is_url, Document};
use crate::error::AppError;

pub use pdf::PdfLoader;
pub use splitter::{split_documents, split_text, SplitterConfig};
pub use web::WebLoader;

/// Turns a source locator (URL or file path) into documents.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, locator: &str) -> Result<Vec<Document>, AppError>;
}

/// Reject anything that is not an absolute http(s) URL with a host.
pub fn validate_url(url: &str) -> Result<String, AppError> {
    let url = url.trim();
    if !is_url(url) {
        return Err(AppError::validation(
            "INGEST_URL_INVALID",
            "URL must start with http:// or https://",
        )
        .with_details(format!("url={url}")));
    }
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or("");
    let host = rest.split(|c: char| c == '/' || c == '?' || c == '#').next().unwrap_or("");
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(AppError::validation("INGEST_URL_INVALID", "URL is missing a host")
            .with_details(format!("url={url}")));
    }
    Ok(url.to_string())
}

pub fn validate_pdf_name(file_name: &str) -> Result<(), AppError> {
    let name = file_name.trim();
    if name.is_empty() {
        return Err(AppError::validation("INGEST_FILE_INVALID", "File name is required"));
    }
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        return Err(AppError::validation("INGEST_FILE_INVALID", "File must be a PDF")
            .with_details(format!("file={name}")));
    }
    Ok(())
}

/// Upload names must be a bare file name so they stay inside the uploads directory.
pub fn validate_upload_name(file_name: &str) -> Result<(), AppError> {
    validate_pdf_name(file_name)?;
    let name = file_name.trim();
    if name.contains('/') || name.contains('\\') || name.starts_with('.') {
        return Err(AppError::validation(
            "INGEST_FILE_INVALID",
            "Upload file name must not contain path components",
        )
        .with_details(format!("file={name}")));
    }
    Ok(())
}

pub fn ensure_new_source(source: &str, existing: &BTreeSet<String>) -> Result<(), AppError> {
    if existing.contains(source) {
        return Err(AppError::validation(
            "INGEST_DUPLICATE_SOURCE",
            "Source already exists in the knowledge base",
        )
        .with_details(format!("source={source}")));
    }
    Ok(())
}
