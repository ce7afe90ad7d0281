//! Vector similarity primitives.
//!
//! Pure functions over vector slices. All similarity values live in a single
//! monotonic-ranking space where higher always means "more similar", so
//! callers never need to branch on the configured metric when sorting.

use serde::{Deserialize, Serialize};

/// Distance/similarity metric used by a store or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity, reported directly in `[-1, 1]`.
    Cosine,
    /// Euclidean (L2) distance, mapped to `1 / (1 + d)` for ranking.
    Euclidean,
    /// Raw dot product (inner product), useful for MIPS-style search.
    Dot,
}

impl DistanceMetric {
    /// Parses a metric name as used in configuration and the wire API.
    ///
    /// # Errors
    ///
    /// Returns `None` for any value other than `cosine`, `euclidean`, `dot`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cosine" => Some(Self::Cosine),
            "euclidean" => Some(Self::Euclidean),
            "dot" | "dot_product" | "dotproduct" => Some(Self::Dot),
            _ => None,
        }
    }

    /// Computes this metric's similarity between `a` and `b` given their
    /// precomputed magnitudes (ignored for `Dot`).
    #[must_use]
    pub fn similarity(&self, a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
        match self {
            Self::Cosine => cosine(a, b, mag_a, mag_b),
            Self::Euclidean => 1.0 / (1.0 + euclidean(a, b)),
            Self::Dot => dot(a, b),
        }
    }
}

/// Dot product `sum(a_i * b_i)`.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean norm `sqrt(sum(x_i^2))`, accumulated in `f64` to reduce
/// rounding error for large dimensionality, then narrowed to `f32`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn magnitude(v: &[f32]) -> f32 {
    let sum_sq: f64 = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    sum_sq.sqrt() as f32
}

/// Cosine similarity given precomputed magnitudes. Yields `0.0` if either
/// vector has zero magnitude, rather than dividing by zero.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32], mag_a: f32, mag_b: f32) -> f32 {
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (mag_a * mag_b)
}

/// Euclidean distance `sqrt(sum((a_i - b_i)^2))`, `f64`-accumulated.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    let sum_sq: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    sum_sq.sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let a = vec![1.0, 0.0, 0.0];
        let m = magnitude(&a);
        assert!((cosine(&a, &a, m, m) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine(&a, &b, magnitude(&a), magnitude(&b)).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_magnitude_yields_zero() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine(&a, &b, 0.0, magnitude(&b)), 0.0);
    }

    #[test]
    fn euclidean_matches_known_triangle() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![3.0, 4.0, 0.0];
        assert!((euclidean(&a, &b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_similarity_is_bounded_and_monotone() {
        let a = vec![0.0, 0.0];
        let near = vec![0.1, 0.0];
        let far = vec![10.0, 0.0];
        let sim_near = DistanceMetric::Euclidean.similarity(&a, &near, 0.0, 0.0);
        let sim_far = DistanceMetric::Euclidean.similarity(&a, &far, 0.0, 0.0);
        assert!(sim_near > sim_far);
        assert!(sim_near <= 1.0 && sim_far > 0.0);
    }

    #[test]
    fn parse_accepts_known_names_only() {
        assert_eq!(DistanceMetric::parse("cosine"), Some(DistanceMetric::Cosine));
        assert_eq!(DistanceMetric::parse("DOT"), Some(DistanceMetric::Dot));
        assert_eq!(DistanceMetric::parse("manhattan"), None);
    }
}
