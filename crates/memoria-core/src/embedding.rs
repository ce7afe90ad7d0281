//! The embedding seam: `text -> vector`, pluggable per spec §1/§9.
//!
//! The core never talks to a real embedding provider; callers supply one
//! at `PersonaMemoryManager` construction. The only implementation shipped
//! here is a deterministic local stub for tests and offline development.

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Converts text into an embedding vector of a declared dimensionality.
///
/// Implementations may call out to a network service; the trait's `Result`
/// return lets such failures surface as `Error::Dependency`.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Embeds `text`.
    ///
    /// # Errors
    /// Returns `Error::Dependency` if the underlying provider is unreachable
    /// or rejects the request.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A deterministic, content-hashed embedding provider.
///
/// This is a test/dev aid only — spec §9 flags the source's equivalent as a
/// placeholder that must not be used in production, since it carries no
/// actual semantic signal: two unrelated sentences sharing no words can
/// still land near each other by hash coincidence, and near-duplicate text
/// is not guaranteed to embed near its original. Keep it for local
/// development and tests; wire a real provider (e.g. an HTTP client hitting
/// an embeddings API) for anything user-facing.
pub struct DeterministicEmbeddingProvider {
    dimensions: usize,
}

impl DeterministicEmbeddingProvider {
    /// Creates a provider that returns vectors of length `dimensions`.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl EmbeddingProvider for DeterministicEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[allow(clippy::cast_precision_loss)]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut state = u64::from_le_bytes(digest[0..8].try_into().unwrap_or([1; 8]));
        if state == 0 {
            state = 0x9E37_79B9_7F4A_7C15;
        }

        let mut vector = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            vector.push((unit * 2.0 - 1.0) as f32);
        }
        Ok(vector)
    }
}
