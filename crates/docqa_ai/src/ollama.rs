use std::time::Duration;

use docqa_core::error::{AppError, ErrorKind};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to `127.0.0.1`.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let rest = base_url.strip_prefix("http://127.0.0.1").ok_or_else(|| {
            AppError::validation(
                "OLLAMA_REMOTE_NOT_ALLOWED",
                "Ollama base URL must be localhost (127.0.0.1)",
            )
            .with_details(format!("base_url={base_url}"))
        })?;
        if !rest.is_empty() {
            // Only an explicit, valid port may follow the host.
            let port_ok = rest
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .map(|p| p != 0)
                .unwrap_or(false);
            if !port_ok {
                return Err(AppError::validation(
                    "OLLAMA_REMOTE_NOT_ALLOWED",
                    "Ollama base URL must be http://127.0.0.1[:port]",
                )
                .with_details(format!("base_url={base_url}")));
            }
        }

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health_check(&self, kind: ErrorKind) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(Duration::from_millis(800)).call();

        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(AppError::new(
                kind,
                "OLLAMA_UNHEALTHY",
                "Ollama health check failed",
            )
            .with_details(format!("status={code}"))),
            Err(e) => Err(AppError::new(
                kind,
                "OLLAMA_UNREACHABLE",
                "Failed to reach Ollama on 127.0.0.1",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }

    /// POST a JSON body and decode a JSON reply. Failures carry `kind` and `code`.
    pub(crate) fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        kind: ErrorKind,
        code: &str,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        match ureq::post(&url).timeout(self.timeout).send_json(body) {
            Ok(r) => r.into_json::<T>().map_err(|e| {
                AppError::new(kind, code, "Failed to decode Ollama response")
                    .with_details(format!("url={url}; err={e}"))
            }),
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_default();
                Err(AppError::new(kind, code, "Ollama request failed")
                    .with_details(format!("url={url}; status={status}; body={body}"))
                    .with_retryable(status >= 500))
            }
            Err(e) => Err(AppError::new(kind, code, "Failed to call Ollama endpoint")
                .with_details(format!("url={url}; err={e}"))
                .with_retryable(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_localhost_only_base_url() {
        assert!(OllamaClient::new("http://127.0.0.1:11434").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1:11434/").is_ok());

        assert!(OllamaClient::new("http://localhost:11434").is_err());
        assert!(OllamaClient::new("https://example.com").is_err());
        assert!(OllamaClient::new("http://127.0.0.1.evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1@evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:0").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:99999").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:11434/api").is_err());
    }
}
