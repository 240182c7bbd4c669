//! Embedding client: text in, unit-norm 1024-dim vector out.
//!
//! Callers on the query path pass drug terms only, never condition words;
//! the ingest path embeds whole denormalized documents. Both go through the
//! same [`Embedder`] seam so tests can substitute the deterministic mock.

pub mod cache;
pub mod client;

pub use cache::{CachedEmbedder, EmbeddingCache};
pub use client::HttpEmbeddingClient;

use async_trait::async_trait;

use crate::model::EMBEDDING_DIM;
use crate::util::backoff::Transient;

/// Maximum input size in bytes, after trim.
pub const MAX_INPUT_BYTES: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("empty input text")]
    EmptyInput,
    #[error("input too long: {0} bytes (max {MAX_INPUT_BYTES})")]
    InputTooLong(usize),
    #[error("cannot reach embedding service at {0}")]
    Connection(String),
    #[error("embedding request timed out")]
    Timeout,
    #[error("embedding service returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("failed to parse embedding response: {0}")]
    ResponseParsing(String),
    #[error("embedding dimension {0} != {EMBEDDING_DIM}")]
    Dimension(usize),
    #[error("embedding cache: {0}")]
    Cache(String),
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Connection(_) | EmbeddingError::Timeout => true,
            EmbeddingError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Model identifier; namespaces the embedding cache.
    fn model_id(&self) -> &str;
}

/// Validate the caller-side input contract shared by every implementation.
pub fn check_input(text: &str) -> Result<&str, EmbeddingError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    if trimmed.len() > MAX_INPUT_BYTES {
        return Err(EmbeddingError::InputTooLong(trimmed.len()));
    }
    Ok(trimmed)
}

/// L2-normalize in place. No-op on the zero vector.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Deterministic embedder for tests and fixture seeding. Same text always
/// produces the same unit vector; different texts diverge.
pub struct MockEmbedder {
    model_id: String,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            model_id: "mock-embedder".into(),
        }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = check_input(text)?;
        Ok(deterministic_vector(trimmed, EMBEDDING_DIM))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Hash-based unit vector. Stable across runs and platforms.
pub fn deterministic_vector(text: &str, dim: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    let mut vec = vec![0.0f32; dim];
    let mut state: u32 = 2166136261;
    for (i, slot) in vec.iter_mut().enumerate() {
        let b = bytes[i % bytes.len().max(1)] as u32;
        state = (state ^ (b + i as u32)).wrapping_mul(16777619);
        *slot = ((state >> 8) as f32 / (1u32 << 24) as f32) - 0.5;
    }
    l2_normalize(&mut vec);
    vec
}
