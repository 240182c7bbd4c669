//! LLM chat client used by query understanding.
//!
//! One call shape: static cacheable system prompt + one user message, JSON
//! out. Conformance is enforced here at the key level (the preprocessor does
//! the deeper validation): a reply missing required keys is retried once with
//! a stricter directive, then surfaced as `InvalidResponse`.

pub mod client;

pub use client::HttpChatModel;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::util::backoff::Transient;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("cannot reach LLM provider at {0}")]
    Connection(String),
    #[error("LLM request timed out")]
    Timeout,
    #[error("LLM provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("failed to parse LLM response: {0}")]
    ResponseParsing(String),
    #[error("LLM response did not conform to the expected schema")]
    InvalidResponse,
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Connection(_) | LlmError::Timeout => true,
            LlmError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Top-level keys the structured reply must carry.
#[derive(Debug, Clone, Copy)]
pub struct ResponseSchema {
    pub required_keys: &'static [&'static str],
}

impl ResponseSchema {
    pub fn conforms(&self, value: &serde_json::Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        self.required_keys.iter().all(|k| obj.contains_key(*k))
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one user message under the static system prompt and return the
    /// schema-conforming JSON reply.
    async fn chat(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, LlmError>;
}

#[async_trait]
impl ChatModel for Box<dyn ChatModel> {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, LlmError> {
        (**self).chat(system, user, schema).await
    }
}

/// Scripted chat model for tests: pops canned replies in order, then fails.
pub struct MockChatModel {
    replies: Mutex<Vec<Result<serde_json::Value, LlmError>>>,
}

impl MockChatModel {
    pub fn new(replies: Vec<Result<serde_json::Value, LlmError>>) -> Self {
        let mut replies = replies;
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
        }
    }

    pub fn always(reply: serde_json::Value) -> Self {
        Self::new(vec![Ok(reply)])
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(
        &self,
        _system: &str,
        _user: &str,
        schema: &ResponseSchema,
    ) -> Result<serde_json::Value, LlmError> {
        let mut replies = self.replies.lock().unwrap();
        let reply = match replies.len() {
            0 => return Err(LlmError::Connection("mock exhausted".into())),
            1 => match &replies[0] {
                // Keep the last reply so `always` keeps answering.
                Ok(v) => Ok(v.clone()),
                Err(_) => replies.pop().unwrap(),
            },
            _ => replies.pop().unwrap(),
        };
        let value = reply?;
        if !schema.conforms(&value) {
            return Err(LlmError::InvalidResponse);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: ResponseSchema = ResponseSchema {
        required_keys: &["drug_terms", "filters"],
    };

    #[test]
    fn schema_requires_all_keys() {
        assert!(SCHEMA.conforms(&serde_json::json!({"drug_terms": [], "filters": {}})));
        assert!(!SCHEMA.conforms(&serde_json::json!({"drug_terms": []})));
        assert!(!SCHEMA.conforms(&serde_json::json!(["not", "an", "object"])));
    }

    #[tokio::test]
    async fn mock_replays_in_order() {
        let mock = MockChatModel::new(vec![
            Err(LlmError::Timeout),
            Ok(serde_json::json!({"drug_terms": ["aspirin"], "filters": {}})),
        ]);
        assert!(mock.chat("s", "u", &SCHEMA).await.is_err());
        let v = mock.chat("s", "u", &SCHEMA).await.unwrap();
        assert_eq!(v["drug_terms"][0], "aspirin");
    }
}
