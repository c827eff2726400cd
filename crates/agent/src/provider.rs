use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use trackcrow_core::conversation::{Role, TranscriptTurn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("model endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("model output was not usable JSON: {0}")]
    MalformedOutput(String),
}

/// The single constrained-generation entry point the pipeline depends on.
/// One call in, one JSON object out; prompt content and schema policy live
/// with the callers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate_object(
        &self,
        system: &str,
        history: &[TranscriptTurn],
        user_text: &str,
    ) -> Result<Value, ProviderError>;
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub temperature: f32,
    pub timeout: Duration,
}

/// OpenAI-compatible chat-completions client. Works against any endpoint
/// speaking that dialect, including a local Ollama.
pub struct HttpModelProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpModelProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn generate_object(
        &self,
        system: &str,
        history: &[TranscriptTurn],
        user_text: &str,
    ) -> Result<Value, ProviderError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage { role: "system", content: system.to_owned() });
        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(WireMessage { role, content: turn.text.clone() });
        }
        messages.push(WireMessage { role: "user", content: user_text.to_owned() });

        let body = CompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            let bearer = format!("Bearer {}", key.expose_secret());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer)
                    .map_err(|error| ProviderError::Transport(error.to_string()))?,
            );
        }

        debug!(
            event_name = "provider.request_prepared",
            model = %self.config.model,
            history_turns = history.len(),
            user_chars = user_text.len(),
        );

        let response = self
            .client
            .post(self.endpoint())
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|error| ProviderError::Transport(error.to_string()))?;
        let content = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ProviderError::MalformedOutput("response has no choices".to_owned()))?;

        debug!(event_name = "provider.completion_received", content_chars = content.len());

        parse_object(content)
    }
}

/// Models occasionally wrap output in prose or a markdown fence even when a
/// JSON response format was requested. Recover the outermost object before
/// giving up.
pub fn parse_object(raw: &str) -> Result<Value, ProviderError> {
    let candidate = strip_code_fence(raw);
    let (Some(start), Some(end)) = (candidate.find('{'), candidate.rfind('}')) else {
        return Err(ProviderError::MalformedOutput(preview(raw)));
    };
    if end <= start {
        return Err(ProviderError::MalformedOutput(preview(raw)));
    }

    serde_json::from_str(&candidate[start..=end])
        .map_err(|error| ProviderError::MalformedOutput(error.to_string()))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn preview(raw: &str) -> String {
    const MAX_CHARS: usize = 160;
    if raw.chars().count() <= MAX_CHARS {
        return raw.to_owned();
    }
    let mut cut: String = raw.chars().take(MAX_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use crate::provider::{parse_object, HttpModelProvider, ProviderConfig, ProviderError};

    #[test]
    fn plain_objects_parse_directly() {
        let parsed = parse_object(r#"{"relevance": 4, "intent": "totalSpend"}"#)
            .expect("plain object should parse");
        assert_eq!(parsed["relevance"], json!(4));
    }

    #[test]
    fn fenced_and_prose_wrapped_objects_are_recovered() {
        let fenced = "```json\n{\"relevance\": 4}\n```";
        assert_eq!(parse_object(fenced).expect("fenced object parses")["relevance"], json!(4));

        let wrapped = "Here is the classification you asked for: {\"relevance\": 2} Hope it helps.";
        assert_eq!(parse_object(wrapped).expect("wrapped object parses")["relevance"], json!(2));
    }

    #[test]
    fn output_without_an_object_is_rejected() {
        let error = parse_object("I could not classify that.").expect_err("prose must fail");
        assert!(matches!(error, ProviderError::MalformedOutput(_)));

        let error = parse_object("} nonsense {").expect_err("reversed braces must fail");
        assert!(matches!(error, ProviderError::MalformedOutput(_)));

        let error = parse_object("{\"unterminated\": ").expect_err("broken JSON must fail");
        assert!(matches!(error, ProviderError::MalformedOutput(_)));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash_in_base_url() {
        let provider = HttpModelProvider::new(ProviderConfig {
            base_url: "http://localhost:11434/v1/".to_owned(),
            model: "llama3.1".to_owned(),
            api_key: Some(SecretString::from("test-key")),
            temperature: 0.0,
            timeout: std::time::Duration::from_secs(5),
        })
        .expect("client should build");

        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
