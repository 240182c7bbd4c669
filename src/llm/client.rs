//! HTTP chat client speaking an Anthropic-style messages API.
//!
//! The static system prompt is sent as a content block marked
//! `cache_control: {"type": "ephemeral"}` so the provider can serve cached
//! prompt tokens on every call after the first.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{ChatModel, LlmError, ResponseSchema};
use crate::util::backoff::{with_retries, RetryPolicy};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

/// Appended to the system prompt on the single schema-violation retry.
const STRICT_DIRECTIVE: &str = "\n\nIMPORTANT: Respond with a single JSON object and nothing else. \
     No prose, no markdown fences, no explanations.";

pub struct HttpChatModel {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpChatModel {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            client,
            retry: RetryPolicy::default(),
        }
    }

    async fn send(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: vec![SystemBlock {
                block_type: "text",
                text: system,
                cache_control: CacheControl { control: "ephemeral" },
            }],
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::ResponseParsing(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        parsed["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ResponseParsing("no text content block".into()))
    }

    async fn attempt(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, LlmError> {
        let text = with_retries(self.retry, || self.send(system, user)).await?;
        let value = extract_json(&text).ok_or(LlmError::InvalidResponse)?;
        if schema.conforms(&value) {
            Ok(value)
        } else {
            Err(LlmError::InvalidResponse)
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: Vec<SystemBlock<'a>>,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct SystemBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'a str,
    text: &'a str,
    cache_control: CacheControl<'a>,
}

#[derive(Serialize)]
struct CacheControl<'a> {
    #[serde(rename = "type")]
    control: &'a str,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, LlmError> {
        match self.attempt(system, user, schema).await {
            Err(LlmError::InvalidResponse) => {
                tracing::debug!("schema violation, retrying with strict directive");
                let strict = format!("{system}{STRICT_DIRECTIVE}");
                self.attempt(&strict, user, schema).await
            }
            other => other,
        }
    }
}

/// Pull the JSON object out of a model reply, tolerating markdown fences and
/// surrounding prose.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SCHEMA: ResponseSchema = ResponseSchema {
        required_keys: &["drug_terms"],
    };

    fn reply(text: &str) -> serde_json::Value {
        serde_json::json!({ "content": [{ "type": "text", "text": text }] })
    }

    fn client_for(server: &MockServer) -> HttpChatModel {
        HttpChatModel::new(
            &server.uri(),
            "claude-haiku",
            "key-123",
            std::time::Duration::from_secs(10),
        )
    }

    #[test]
    fn extract_json_handles_fences_and_prose() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(fenced).unwrap()["a"], 1);

        let prose = "Here you go: {\"a\": 2} hope that helps";
        assert_eq!(extract_json(prose).unwrap()["a"], 2);

        assert!(extract_json("no json here").is_none());
    }

    #[tokio::test]
    async fn sends_cacheable_system_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key-123"))
            .and(body_partial_json(serde_json::json!({
                "system": [{"type": "text", "cache_control": {"type": "ephemeral"}}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(reply(r#"{"drug_terms": ["aspirin"]}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let value = client_for(&server).chat("sys", "user", &SCHEMA).await.unwrap();
        assert_eq!(value["drug_terms"][0], "aspirin");
    }

    #[tokio::test]
    async fn retries_once_on_schema_violation() {
        let server = MockServer::start().await;
        // First reply: valid JSON, wrong shape. Second: conforming.
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply(r#"{"oops": true}"#)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(reply(r#"{"drug_terms": []}"#)),
            )
            .mount(&server)
            .await;

        let value = client_for(&server).chat("sys", "user", &SCHEMA).await.unwrap();
        assert!(value["drug_terms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_schema_violation_surfaces_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("not json")))
            .mount(&server)
            .await;

        let err = client_for(&server).chat("sys", "user", &SCHEMA).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse));
    }

    #[tokio::test]
    async fn overloaded_provider_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(reply(r#"{"drug_terms": ["x"]}"#)),
            )
            .mount(&server)
            .await;

        assert!(client_for(&server).chat("sys", "user", &SCHEMA).await.is_ok());
    }
}
