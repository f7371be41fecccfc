//! Capability routing by embedding similarity.

pub mod capability;
pub mod embedding;
pub mod router;

pub use capability::{Capability, CapabilityInvoker};
pub use embedding::{cosine_similarity, EmbeddingCache, EmbeddingProvider};
pub use router::{CapabilityRouter, RouteDecision};
