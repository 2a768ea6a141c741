use std::sync::Arc;
use std::time::Duration;

use docqa_core::error::AppError;

pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError>;
}

pub mod ollama_llm;
pub mod openai_compat;

pub use ollama_llm::OllamaLlm;
pub use openai_compat::ChatCompletionsLlm;

/// Retries retryable failures of `inner` up to `max_retries` extra times,
/// sleeping `backoff * attempt` in between. The last error is returned.
pub struct RetryingLlm {
    inner: Arc<dyn Llm>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn Llm>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Llm for RetryingLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.generate(model, prompt) {
                Ok(text) => return Ok(text),
                Err(e) if e.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, max_retries = self.max_retries, err = %e, "generation failed; retrying");
                    std::thread::sleep(self.backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        retryable: bool,
    }

    impl Llm for Flaky {
        fn generate(&self, _model: &str, _prompt: &str) -> Result<String, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(AppError::generation("GENERATION_FAILED", "boom").with_retryable(self.retryable));
            }
            Ok("ok".to_string())
        }
    }

    #[test]
    fn retries_transient_failures_within_budget() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
            retryable: true,
        });
        let llm = RetryingLlm::new(inner.clone(), 2).with_backoff(Duration::ZERO);
        assert_eq!(llm.generate("m", "p").expect("generate"), "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_when_budget_exhausted() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 5,
            retryable: true,
        });
        let llm = RetryingLlm::new(inner.clone(), 1).with_backoff(Duration::ZERO);
        assert!(llm.generate("m", "p").is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            failures: 1,
            retryable: false,
        });
        let llm = RetryingLlm::new(inner.clone(), 3).with_backoff(Duration::ZERO);
        assert!(llm.generate("m", "p").is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
