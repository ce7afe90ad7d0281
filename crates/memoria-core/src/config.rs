//! Engine configuration, layered `env > memoria.toml > defaults` via
//! `figment`, matching `velesdb-core::config`'s layering. Unknown keys are
//! rejected rather than silently ignored, per the redesign note in spec §9
//! ("dynamic config objects → enumerated config").

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};

/// `indexType` from spec §6.3: the ANN strategy a store is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Multilayer HNSW graph (the default).
    Hnsw,
    /// Exhaustive linear scan; exact but O(n) per query.
    Flat,
}

/// Which embedding backend the server wires in at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Openai,
    Local,
}

/// All options from spec §6.3, as a typed, validated struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Sizes the vector buffer: `capacity = max_memory_mb * 1_000_000 / (dimensions * 4)`.
    pub max_memory_mb: u64,
    /// Declared dimensionality of every stored vector and the default
    /// embedding target.
    pub default_dimensions: usize,
    /// `hnsw` or `flat`.
    pub index_type: IndexType,
    /// `cosine`, `euclidean`, or `dot`.
    pub distance_metric: DistanceMetric,
    /// Safety cap on buffer capacity, independent of `max_memory_mb`.
    pub max_vectors: usize,
    /// Global rate-limit window, in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Maximum requests per window, per key.
    pub rate_limit_max_requests: u32,
    /// Cost factor for hashing issued API keys.
    pub api_key_salt_rounds: u32,
    /// `openai` or `local`.
    pub embedding_provider: EmbeddingProviderKind,
    /// Model name passed to the embedding provider.
    pub embedding_model: String,
    /// `tracing` filter directive, e.g. `"info"` or `"memoria_core=debug"`.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            default_dimensions: 1536,
            index_type: IndexType::Hnsw,
            distance_metric: DistanceMetric::Cosine,
            max_vectors: 1_000_000,
            rate_limit_window_ms: 60_000,
            rate_limit_max_requests: 120,
            api_key_salt_rounds: 10,
            embedding_provider: EmbeddingProviderKind::Local,
            embedding_model: "local-deterministic".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Byte budget for the vector buffer, clamped so `max_vectors` is
    /// never exceeded regardless of `max_memory_mb`.
    #[must_use]
    pub fn max_memory_bytes(&self) -> usize {
        let from_mb = self.max_memory_mb as usize * 1_000_000;
        let vector_bytes = self.default_dimensions * std::mem::size_of::<f32>();
        from_mb.min(self.max_vectors.saturating_mul(vector_bytes))
    }

    /// Loads configuration from (in increasing precedence) built-in
    /// defaults, `memoria.toml` if present, and `MEMORIA_*` environment
    /// variables.
    ///
    /// # Errors
    /// Returns `Validation` if any layer sets an unknown key or a value of
    /// the wrong shape.
    pub fn load(toml_path: &std::path::Path) -> Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(toml_path))
            .merge(Env::prefixed("MEMORIA_").split("__"))
            .extract()
            .map_err(|err| Error::Validation(format!("config: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_round_trip_through_figment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.default_dimensions, 1536);
        assert_eq!(config.distance_metric, DistanceMetric::Cosine);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "default_dimensions = 768").unwrap();
        writeln!(file, "distance_metric = \"dot\"").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.default_dimensions, 768);
        assert_eq!(config.distance_metric, DistanceMetric::Dot);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "totally_unknown_option = 42").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }

    #[test]
    fn max_memory_bytes_respects_max_vectors_cap() {
        let config = EngineConfig {
            max_memory_mb: 10_000,
            default_dimensions: 128,
            max_vectors: 10,
            ..EngineConfig::default()
        };
        assert_eq!(config.max_memory_bytes(), 10 * 128 * 4);
    }
}
