//! Similarity-based capability selection.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::routing::capability::Capability;
use crate::routing::embedding::{cosine_similarity, EmbeddingCache};

/// A routing result: the chosen capability and its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub capability: String,
    pub score: f32,
}

struct RouterEntry {
    capability: Capability,
    embedding: Vec<f32>,
}

/// Routes task descriptions to the most similar registered capability.
///
/// Capability embeddings are computed once at registration. Ties within
/// `epsilon` resolve to the earlier-registered capability, which makes
/// registration order a deliberate priority order.
pub struct CapabilityRouter {
    entries: Vec<RouterEntry>,
    embeddings: EmbeddingCache,
    threshold: f32,
    epsilon: f32,
}

impl CapabilityRouter {
    pub fn new(embeddings: EmbeddingCache, threshold: f32, epsilon: f32) -> Self {
        Self {
            entries: Vec::new(),
            embeddings,
            threshold,
            epsilon,
        }
    }

    /// Register a capability, embedding its description eagerly.
    ///
    /// # Errors
    /// Returns an error if the name is already taken or the embedding
    /// provider fails.
    pub async fn register(&mut self, capability: Capability) -> Result<()> {
        if self.contains(&capability.name) {
            return Err(Error::CapabilityExists(capability.name));
        }
        let embedding = self.embeddings.embed_uncached(&capability.description).await?;
        info!(capability = %capability.name, "capability registered");
        self.entries.push(RouterEntry {
            capability,
            embedding,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.capability.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.entries
            .iter()
            .find(|e| e.capability.name == name)
            .map(|e| &e.capability)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.capability.name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the best-scoring capability for a description.
    ///
    /// # Errors
    /// Returns [`Error::NoConfidentMatch`] when no registered capability
    /// reaches the confidence threshold, carrying the best candidate so
    /// callers can report what was almost chosen.
    pub async fn route(&self, description: &str) -> Result<RouteDecision> {
        if self.entries.is_empty() {
            return Err(Error::NoConfidentMatch {
                best_candidate: None,
                best_score: 0.0,
            });
        }

        let task_embedding = self.embeddings.embed_task(description).await?;

        let mut entry = &self.entries[0];
        let mut score = cosine_similarity(&task_embedding, &entry.embedding);
        debug!(capability = %entry.capability.name, score, "similarity scored");
        for candidate in &self.entries[1..] {
            let candidate_score = cosine_similarity(&task_embedding, &candidate.embedding);
            debug!(capability = %candidate.capability.name, score = candidate_score, "similarity scored");
            // Later entries must beat the incumbent by more than epsilon.
            if candidate_score > score + self.epsilon {
                entry = candidate;
                score = candidate_score;
            }
        }

        if score < self.threshold {
            return Err(Error::NoConfidentMatch {
                best_candidate: Some(entry.capability.name.clone()),
                best_score: score,
            });
        }
        Ok(RouteDecision {
            capability: entry.capability.name.clone(),
            score,
        })
    }
}

impl std::fmt::Debug for CapabilityRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRouter")
            .field("capabilities", &self.names())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
