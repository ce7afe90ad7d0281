//! HNSW tuning parameters.

use serde::{Deserialize, Serialize};

/// Tuning parameters for an [`super::HnswIndex`].
///
/// `m0` defaults to `2 * m` if not set explicitly, matching the standard
/// HNSW construction (layer 0 carries twice the connectivity of upper
/// layers since it must remain navigable on its own).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Target neighbors per node per layer, except layer 0 (default 16).
    pub m: usize,
    /// Target neighbors at layer 0 (default `2 * m`).
    pub m0: usize,
    /// Candidate-list size during insertion (default 200).
    pub ef_construction: usize,
    /// Default candidate-list size at query time (default 50).
    pub ef_search: usize,
    /// Below this many indexed nodes, searches fall back to exhaustive scan.
    pub index_threshold: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(16, 200, 50)
    }
}

impl HnswParams {
    /// Builds parameters with `m0 = 2 * m` and a default `index_threshold`
    /// of 1000 nodes.
    #[must_use]
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        Self {
            m,
            m0: m * 2,
            ef_construction,
            ef_search,
            index_threshold: 1000,
        }
    }

    /// `1 / ln(m)`, controlling the expected distribution of node levels.
    #[must_use]
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m.max(2) as f64).ln()
    }
}
