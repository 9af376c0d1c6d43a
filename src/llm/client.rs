// src/llm/client.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::Provider;
use crate::error::BackendError;
use crate::llm::backend::CompletionBackend;
use crate::llm::prompt::LlmPrompt;

/// Hosted chat API (OpenAI responses or Anthropic messages).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    provider: Provider,
    model: String,
    api_key: String,
    base_url: Option<String>,
}

impl HttpBackend {
    pub fn new(
        provider: Provider,
        model: String,
        api_key: String,
        base_url: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        // the caller's generation timeout is the real bound
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            provider,
            model,
            api_key,
            base_url,
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, prompt: &LlmPrompt, max_tokens: u32) -> Result<String, BackendError> {
        let prompt_hash = prompt.hash();
        let (url, headers, body) = build_request(self, prompt, &prompt_hash, max_tokens);

        let mut req = self.http.post(&url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        if let Some(cached) = json
            .pointer("/usage/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
        {
            tracing::debug!(cached, "prompt cache hit");
        }

        extract_text(self.provider, &json)
    }

    fn name(&self) -> String {
        let p = match self.provider {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
        };
        format!("{p}:{}", self.model)
    }
}

/// 429 and 5xx may succeed later; other statuses will not.
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message: String = body.chars().take(500).collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::RateLimited(message)
    } else if status.is_server_error() {
        BackendError::Transport(format!("{status}: {message}"))
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn build_request(
    cfg: &HttpBackend,
    prompt: &LlmPrompt,
    prompt_hash: &str,
    max_tokens: u32,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/responses".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "instructions": prompt.system,
                "input": prompt.user,
                "max_output_tokens": max_tokens,
                "prompt_cache_key": prompt_hash,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": max_tokens,
                "system": prompt.system,
                "messages": [
                    { "role": "user", "content": prompt.user }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: Provider, v: &Value) -> Result<String, BackendError> {
    let text = match provider {
        Provider::OpenAI => v
            .get("output")
            .and_then(|o| o.as_array())
            .and_then(|arr| {
                arr.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                })
            }),

        Provider::Anthropic => v.pointer("/content/0/text").and_then(|v| v.as_str()),
    };

    text.map(str::to_owned)
        .ok_or_else(|| BackendError::Malformed(format!("{provider:?} response has no text")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        let e = classify_status(StatusCode::UNAUTHORIZED, "bad key");
        assert!(!e.is_retryable());
        assert!(matches!(e, BackendError::Rejected { status: 401, .. }));
    }

    #[test]
    fn extracts_provider_text() {
        let openai = json!({
            "output": [
                { "type": "reasoning" },
                { "content": [ { "type": "output_text", "text": "```rust\nfn t() {}\n```" } ] }
            ]
        });
        assert_eq!(extract_text(Provider::OpenAI, &openai).unwrap(), "```rust\nfn t() {}\n```");

        let anthropic = json!({ "content": [ { "type": "text", "text": "hi" } ] });
        assert_eq!(extract_text(Provider::Anthropic, &anthropic).unwrap(), "hi");

        assert!(matches!(
            extract_text(Provider::Anthropic, &json!({})),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn request_carries_token_limit() {
        let b = HttpBackend::new(Provider::Anthropic, "m".into(), "k".into(), None).unwrap();
        let prompt = LlmPrompt {
            system: "s".into(),
            user: "u".into(),
        };
        let (url, headers, body) = build_request(&b, &prompt, "h", 321);

        assert_eq!(url, "https://api.anthropic.com/v1/messages");
        assert_eq!(body["max_tokens"], 321);
        assert!(headers.iter().any(|(k, v)| *k == "x-api-key" && v == "k"));
    }
}
