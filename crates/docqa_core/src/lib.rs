pub mod config;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod memory;

#[cfg(test)]
mod tests {
    use super::error::{AppError, ErrorKind};

    #[test]
    fn app_error_is_structured() {
        let err = AppError::index("INDEX_TEST", "index failed")
            .with_details("path=/tmp/x")
            .with_retryable(false);
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(err.code, "INDEX_TEST");
        assert_eq!(err.message, "index failed");
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "[INDEX_TEST] index failed (path=/tmp/x)");
    }

    #[test]
    fn error_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorKind::Generation).expect("json");
        assert_eq!(json, "\"generation\"");
    }
}
