use std::time::Duration;

use scraper::{Html, Node, Selector};

use crate::domain::Document;
use crate::error::AppError;

use super::{validate_url, DocumentLoader};

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Fetches a page and keeps its visible text.
#[derive(Debug, Clone)]
pub struct WebLoader {
    user_agent: String,
    timeout: Duration,
}

impl WebLoader {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }

    fn fetch(&self, url: &str) -> Result<String, AppError> {
        let resp = ureq::get(url)
            .timeout(self.timeout)
            .set("User-Agent", &self.user_agent)
            .call();
        match resp {
            Ok(r) => r.into_string().map_err(|e| {
                AppError::load("LOAD_WEB_FAILED", "Failed to read page body")
                    .with_details(format!("url={url}; err={e}"))
            }),
            Err(ureq::Error::Status(code, _)) => Err(AppError::load(
                "LOAD_WEB_FAILED",
                "Page request was rejected",
            )
            .with_details(format!("url={url}; status={code}"))
            .with_retryable(code >= 500)),
            Err(e) => Err(AppError::load("LOAD_WEB_UNREACHABLE", "Failed to reach URL")
                .with_details(format!("url={url}; err={e}"))
                .with_retryable(true)),
        }
    }
}

impl DocumentLoader for WebLoader {
    fn load(&self, locator: &str) -> Result<Vec<Document>, AppError> {
        let url = validate_url(locator)?;
        let html = self.fetch(&url)?;
        let text = extract_visible_text(&html)?;
        if text.is_empty() {
            return Err(AppError::load("LOAD_WEB_EMPTY", "Page contains no readable text")
                .with_details(format!("url={url}")));
        }
        tracing::debug!(url = %url, chars = text.len(), "extracted page text");
        Ok(vec![Document {
            content: text,
            source: url,
        }])
    }
}

/// Text nodes under `<body>` (or the whole document when there is none),
/// one line per text block, skipping script-like elements.
pub fn extract_visible_text(html: &str) -> Result<String, AppError> {
    let doc = Html::parse_document(html);
    let body_sel = Selector::parse("body").map_err(|e| {
        AppError::load("LOAD_WEB_FAILED", "Invalid selector").with_details(format!("{e:?}"))
    })?;

    let root = match doc.select(&body_sel).next() {
        Some(body) => *body,
        None => doc.tree.root(),
    };

    let mut lines: Vec<String> = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|el| SKIPPED_ELEMENTS.contains(&el.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_body_text_without_scripts() {
        let html = r#"<html><head><title>T</title><style>p { color: red }</style></head>
            <body><h1>Heading</h1><p>First   paragraph
            text.</p><script>var x = 1;</script><p>Second</p></body></html>"#;
        let text = extract_visible_text(html).expect("extract");
        assert_eq!(text, "Heading\nFirst paragraph text.\nSecond");
    }

    #[test]
    fn rejects_non_http_locators_before_fetching() {
        let loader = WebLoader::new("test", Duration::from_secs(1));
        let err = loader.load("file:///etc/passwd").unwrap_err();
        assert_eq!(err.code, "INGEST_URL_INVALID");
    }
}
