use std::time::Duration;

use docqa_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Llm;

/// OpenAI-compatible `/chat/completions` client (Groq by default).
///
/// The prompt is sent as a single user message.
#[derive(Clone)]
pub struct ChatCompletionsLlm {
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl std::fmt::Debug for ChatCompletionsLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsLlm")
            .field("url", &self.url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsLlm {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            max_tokens: 1024,
            temperature: 0.1,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl Llm for ChatCompletionsLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::generation(
                "GENERATION_API_KEY_MISSING",
                "API key for the generation service is not configured",
            )
            .with_details("set GROQ_API_KEY"));
        }
        let req = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let body = serde_json::to_value(&req).map_err(|e| {
            AppError::generation("GENERATION_FAILED", "Failed to encode chat request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body);

        match resp {
            Ok(r) => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::generation("GENERATION_FAILED", "Failed to decode chat response")
                        .with_details(format!("url={}; err={e}", self.url))
                })?;
                let content = v
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(AppError::generation("GENERATION_EMPTY", "Generation response was empty"));
                }
                Ok(content)
            }
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_default();
                Err(AppError::generation("GENERATION_FAILED", "Generation API request failed")
                    .with_details(format!("url={}; status={status}; body={body}", self.url))
                    .with_retryable(status == 429 || status >= 500))
            }
            Err(e) => Err(AppError::generation(
                "GENERATION_UNREACHABLE",
                "Failed to reach the generation API",
            )
            .with_details(format!("url={}; err={e}", self.url))
            .with_retryable(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::error::ErrorKind;

    #[test]
    fn missing_api_key_fails_without_network() {
        let llm = ChatCompletionsLlm::new("http://127.0.0.1:9/v1/chat/completions", "  ");
        let err = llm.generate("m", "hello").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Generation);
        assert_eq!(err.code, "GENERATION_API_KEY_MISSING");
        assert!(!err.retryable);
    }

    #[test]
    fn debug_output_hides_api_key() {
        let llm = ChatCompletionsLlm::new("https://example.invalid", "secret-key");
        assert!(!format!("{llm:?}").contains("secret-key"));
    }

    #[test]
    fn response_tolerates_null_content() {
        let v: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
                .expect("decode");
        assert!(v.choices[0].message.content.is_none());
    }
}
