//! Embedding providers and similarity scoring.
//!
//! The router scores a task description against capability descriptions
//! in embedding space. Providers are pluggable; task embeddings are
//! cached in the store under a short TTL because the same description is
//! frequently resubmitted.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::digest_hex;
use crate::error::Result;
use crate::store::Store;

const KEY_PREFIX: &str = "embed:task:";

/// Produces a vector representation of a text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs, so degenerate
/// embeddings score below any threshold instead of poisoning the ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Store-backed cache in front of an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            provider,
            store,
            ttl,
        }
    }

    /// Embed without caching. Used for capability descriptions, which are
    /// embedded once at registration and held in memory.
    pub async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        self.provider.embed(text).await
    }

    /// Embed a task description, serving repeats from the store.
    ///
    /// Store failures degrade to a direct provider call.
    pub async fn embed_task(&self, text: &str) -> Result<Vec<f32>> {
        let key = format!("{}{}", KEY_PREFIX, digest_hex(&Value::from(text)));

        match self.store.get(&key).await {
            Ok(Some(stored)) => {
                if let Ok(vector) = serde_json::from_value::<Vec<f32>>(stored) {
                    debug!(key, "embedding cache hit");
                    return Ok(vector);
                }
                let _ = self.store.delete(&key).await;
            }
            Ok(None) => {}
            Err(err) => warn!(key, %err, "embedding cache read failed"),
        }

        let vector = self.provider.embed(text).await?;
        match serde_json::to_value(&vector) {
            Ok(value) => {
                if let Err(err) = self.store.set(&key, value, Some(self.ttl)).await {
                    warn!(key, %err, "embedding cache write failed");
                }
            }
            Err(err) => warn!(key, %err, "embedding serialization failed"),
        }
        Ok(vector)
    }
}
