//! HTTP embedding client against an Ollama-compatible embeddings endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_input, l2_normalize, Embedder, EmbeddingError};
use crate::model::EMBEDDING_DIM;
use crate::util::backoff::{with_retries, RetryPolicy};

pub struct HttpEmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, model: &str, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            retry: RetryPolicy::default(),
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingsRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                EmbeddingError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                EmbeddingError::Timeout
            } else {
                EmbeddingError::ResponseParsing(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ResponseParsing(e.to_string()))?;

        if parsed.embedding.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::Dimension(parsed.embedding.len()));
        }

        let mut vector = parsed.embedding;
        // Models advertise unit-norm output; normalize anyway so the stored
        // invariant never depends on the provider.
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = check_input(text)?.to_string();
        with_retries(self.retry, || self.request(&trimmed)).await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unit_embedding_json() -> serde_json::Value {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[0] = 1.0;
        serde_json::json!({ "embedding": v })
    }

    fn client_for(server: &MockServer) -> HttpEmbeddingClient {
        HttpEmbeddingClient::new(
            &server.uri(),
            "mxbai-embed-large",
            std::time::Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn embeds_and_normalizes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .and(body_partial_json(
                serde_json::json!({"model": "mxbai-embed-large", "prompt": "testosterone"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(unit_embedding_json()))
            .mount(&server)
            .await;

        let v = client_for(&server).embed("testosterone").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!((v[0] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn wrong_dimension_is_permanent_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "embedding": [1.0, 0.0] })),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).embed("aspirin").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Dimension(2)));
    }

    #[tokio::test]
    async fn retries_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(unit_embedding_json()))
            .mount(&server)
            .await;

        let v = client_for(&server).embed("lisinopril").await.unwrap();
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn client_error_surfaces_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).embed("aspirin").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Upstream { status: 400, .. }));
    }
}
