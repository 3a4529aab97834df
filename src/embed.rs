//! Embedding boundary.
//!
//! The core never talks to an embedding provider directly; it takes an
//! [`Embedder`] and treats every failure as degradation. A `None` vector for
//! a text means "provider could not embed this" and leaves the owning chunk
//! lexical-only — it is never an error surfaced to a writer or reader.
//!
//! The embedding call is the only network-bound suspension point in both the
//! write path (chunk re-embedding) and the query path (query embedding).

use async_trait::async_trait;
use std::fmt;

/// Error type for embedding operations.
///
/// Callers in this crate map any `Err` to all-`None` vectors; the type exists
/// so implementations can report what went wrong to the logs.
#[derive(Debug)]
pub enum EmbeddingError {
    /// The provider is unreachable or returned no results.
    Unavailable(String),
}

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingError::Unavailable(msg) => write!(f, "embedding unavailable: {msg}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Trait for mapping texts to fixed-length vectors.
///
/// Implementations wrap whatever provider the deployment uses; tests use
/// deterministic mocks. One `Option<Vec<f32>>` per input text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError>;
}

/// Embedder for deployments without a provider: every text degrades to
/// lexical-only.
pub struct NullEmbedder;

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>, EmbeddingError> {
        Ok(vec![None; texts.len()])
    }
}
