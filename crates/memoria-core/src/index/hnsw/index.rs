//! Native HNSW graph: insertion, search, and deletion over buffer slots.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::buffer::{Slot, VectorBuffer};
use crate::distance::{magnitude, DistanceMetric};
use crate::error::{Error, Result};

use super::layer::Layer;
use super::ordered_float::OrderedFloat;
use super::params::HnswParams;

/// A hierarchical navigable small world index over a [`VectorBuffer`]'s slots.
///
/// The index never owns vector data; every distance computation fetches the
/// relevant slot from the `buffer` argument passed to each call. This keeps
/// the index free to be rebuilt, or to share a buffer with another index,
/// without duplicating gigabytes of float data.
pub struct HnswIndex {
    params: HnswParams,
    metric: DistanceMetric,
    layers: RwLock<Vec<Layer>>,
    /// `(entry slot, entry level)`. The entry point is always the node at
    /// the current maximum level.
    entry_point: RwLock<Option<(Slot, usize)>>,
    /// Assigned level per indexed node; also the authoritative "is this
    /// slot indexed" set.
    levels: RwLock<FxHashMap<Slot, usize>>,
    count: AtomicUsize,
    rng_state: AtomicU64,
}

impl HnswIndex {
    /// Creates an empty index with the given tuning parameters and metric.
    #[must_use]
    pub fn new(params: HnswParams, metric: DistanceMetric) -> Self {
        Self {
            params,
            metric,
            layers: RwLock::new(vec![Layer::new(0)]),
            entry_point: RwLock::new(None),
            levels: RwLock::new(FxHashMap::default()),
            count: AtomicUsize::new(0),
            rng_state: AtomicU64::new(0x9E37_79B9_7F4A_7C15),
        }
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// True if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `slot` currently has a node in the graph.
    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool {
        self.levels.read().contains_key(&slot)
    }

    /// The metric this graph's adjacency lists were built with.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// The configured default candidate-list width for queries that don't
    /// supply an explicit `ef`.
    #[must_use]
    pub fn default_ef(&self) -> usize {
        self.params.ef_search
    }

    /// Inserts `slot` (whose vector must already be written into `buffer`)
    /// into the graph.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `slot` is not currently occupied in `buffer`.
    pub fn insert(&self, slot: Slot, buffer: &VectorBuffer) -> Result<()> {
        let vector = buffer.get_slot(slot)?;
        let mag = buffer.get_magnitude_slot(slot)?;
        let level = self.random_level();

        let entry_snapshot = *self.entry_point.read();
        let Some((entry_slot, max_layer)) = entry_snapshot else {
            self.ensure_layers(level, slot);
            self.levels.write().insert(slot, level);
            *self.entry_point.write() = Some((slot, level));
            self.count.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let mut current = entry_slot;
        for layer_idx in (level + 1..=max_layer).rev() {
            current = self.search_layer_single(buffer, &vector, mag, current, layer_idx);
        }

        self.ensure_layers(level, slot);

        for layer_idx in (0..=level).rev() {
            let candidates = self.search_layer(
                buffer,
                &vector,
                mag,
                vec![current],
                self.params.ef_construction,
                layer_idx,
            );
            let max_conn = if layer_idx == 0 {
                self.params.m0
            } else {
                self.params.m
            };
            let selected = self.select_neighbors(buffer, &vector, mag, &candidates, max_conn);

            self.layers.read()[layer_idx].set_neighbors(slot, selected.clone());
            for &neighbor in &selected {
                self.add_bidirectional(buffer, slot, neighbor, layer_idx, max_conn);
            }

            if let Some(&(best, _)) = candidates.first() {
                current = best;
            }
        }

        self.levels.write().insert(slot, level);
        self.count.fetch_add(1, Ordering::Relaxed);

        if level > max_layer {
            *self.entry_point.write() = Some((slot, level));
        }
        Ok(())
    }

    /// Searches for the `k` nearest neighbors of `query`.
    ///
    /// Falls back to an exhaustive scan (exact top-k) while the graph has
    /// fewer than `index_threshold` nodes. Returns `(slot, similarity)`
    /// pairs sorted by similarity descending.
    #[must_use]
    pub fn search(&self, buffer: &VectorBuffer, query: &[f32], k: usize, ef: usize) -> Vec<(Slot, f32)> {
        let count = self.len();
        if count == 0 {
            return Vec::new();
        }
        let query_mag = magnitude(query);

        if count < self.params.index_threshold {
            return self.exhaustive_scan(buffer, query, query_mag, k);
        }

        let Some((entry_slot, max_layer)) = *self.entry_point.read() else {
            return Vec::new();
        };

        let mut current = entry_slot;
        for layer_idx in (1..=max_layer).rev() {
            current = self.search_layer_single(buffer, query, query_mag, current, layer_idx);
        }

        let ef_effective = ef.max(k);
        let candidates = self.search_layer(buffer, query, query_mag, vec![current], ef_effective, 0);
        candidates
            .into_iter()
            .take(k)
            .map(|(slot, dist)| (slot, -dist))
            .collect()
    }

    /// Removes `slot` from the graph: unlinks it from every neighbor at
    /// every layer it appeared in, then promotes a new entry point if
    /// needed. The buffer slot itself is untouched — callers free it there.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `slot` has no node in the graph.
    pub fn delete(&self, slot: Slot) -> Result<()> {
        let level = {
            let mut levels = self.levels.write();
            levels
                .remove(&slot)
                .ok_or_else(|| Error::NotFound(format!("slot {slot} not indexed")))?
        };

        {
            let layers = self.layers.read();
            for layer_idx in 0..=level {
                if layer_idx >= layers.len() {
                    continue;
                }
                for neighbor in layers[layer_idx].get_neighbors(slot) {
                    layers[layer_idx].unlink(neighbor, slot);
                }
                layers[layer_idx].set_neighbors(slot, Vec::new());
            }
        }

        self.count.fetch_sub(1, Ordering::Relaxed);

        let mut entry_point = self.entry_point.write();
        if entry_point.map(|(s, _)| s) == Some(slot) {
            let levels = self.levels.read();
            let mut promoted: Option<(Slot, usize)> = None;
            for (&candidate_slot, &candidate_level) in levels.iter() {
                promoted = match promoted {
                    None => Some((candidate_slot, candidate_level)),
                    Some((best_slot, best_level)) => {
                        if candidate_level > best_level
                            || (candidate_level == best_level && candidate_slot < best_slot)
                        {
                            Some((candidate_slot, candidate_level))
                        } else {
                            Some((best_slot, best_level))
                        }
                    }
                };
            }
            *entry_point = promoted;
        }
        Ok(())
    }

    // -- internals -----------------------------------------------------

    fn ensure_layers(&self, level: usize, slot: Slot) {
        let mut layers = self.layers.write();
        while layers.len() <= level {
            layers.push(Layer::new(slot + 1));
        }
        for layer in layers.iter_mut() {
            layer.ensure_capacity(slot);
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn random_level(&self) -> usize {
        let mut state = self.rng_state.load(Ordering::Relaxed);
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state.store(state, Ordering::Relaxed);

        let uniform = ((state >> 11) as f64 + 1.0) / ((1u64 << 53) as f64 + 1.0);
        let level = (-uniform.ln() * self.params.level_multiplier()).floor();
        if level < 0.0 {
            0
        } else {
            (level as usize).min(31)
        }
    }

    fn distance_to_slot(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        slot: Slot,
    ) -> Option<f32> {
        let vector = buffer.get_slot(slot).ok()?;
        let mag = buffer.get_magnitude_slot(slot).ok()?;
        Some(-self.metric.similarity(query, &vector, query_mag, mag))
    }

    fn search_layer_single(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        entry: Slot,
        layer: usize,
    ) -> Slot {
        let mut best = entry;
        let Some(mut best_dist) = self.distance_to_slot(buffer, query, query_mag, entry) else {
            return entry;
        };

        loop {
            let neighbors = self.layers.read()[layer].get_neighbors(best);
            let mut improved = false;
            for neighbor in neighbors {
                if let Some(dist) = self.distance_to_slot(buffer, query, query_mag, neighbor) {
                    if dist < best_dist {
                        best = neighbor;
                        best_dist = dist;
                        improved = true;
                    }
                }
            }
            if !improved {
                break;
            }
        }
        best
    }

    /// Best-first search within a single layer. Returns `(slot, distance)`
    /// pairs sorted ascending by distance (closest first), ties broken by
    /// ascending slot id. Freed slots encountered mid-search (a race with a
    /// concurrent deletion) are skipped silently.
    fn search_layer(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        entry_points: Vec<Slot>,
        ef: usize,
        layer: usize,
    ) -> Vec<(Slot, f32)> {
        let mut visited: FxHashSet<Slot> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, Slot)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, Slot)> = BinaryHeap::new();

        for ep in entry_points {
            if let Some(dist) = self.distance_to_slot(buffer, query, query_mag, ep) {
                candidates.push(Reverse((OrderedFloat(dist), ep)));
                results.push((OrderedFloat(dist), ep));
                visited.insert(ep);
            }
        }

        while let Some(Reverse((OrderedFloat(c_dist), c_slot))) = candidates.pop() {
            let worst = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if c_dist > worst && results.len() >= ef {
                break;
            }

            let neighbors = self.layers.read()[layer].get_neighbors(c_slot);
            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(dist) = self.distance_to_slot(buffer, query, query_mag, neighbor) else {
                    continue;
                };
                let worst = results.peek().map_or(f32::MAX, |r| r.0 .0);
                if dist < worst || results.len() < ef {
                    candidates.push(Reverse((OrderedFloat(dist), neighbor)));
                    results.push((OrderedFloat(dist), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(Slot, f32)> = results.into_iter().map(|(d, s)| (s, d.0)).collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        out
    }

    /// Heuristic neighbor selection (HNSW Algorithm 4): prefer candidates
    /// close to `query` that are not redundant with an already-picked
    /// neighbor — a candidate is skipped if it is closer to some picked
    /// neighbor than it is to `query` itself. Backfills with the closest
    /// remaining candidates if the heuristic under-fills `max_neighbors`.
    fn select_neighbors(
        &self,
        buffer: &VectorBuffer,
        query: &[f32],
        query_mag: f32,
        candidates: &[(Slot, f32)],
        max_neighbors: usize,
    ) -> Vec<Slot> {
        let _ = (query, query_mag);
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut selected: Vec<Slot> = Vec::with_capacity(max_neighbors);
        let mut selected_repr: Vec<(Vec<f32>, f32)> = Vec::with_capacity(max_neighbors);

        for &(cand_slot, cand_dist) in candidates {
            if selected.len() >= max_neighbors {
                break;
            }
            let Ok(cand_vec) = buffer.get_slot(cand_slot) else {
                continue;
            };
            let Ok(cand_mag) = buffer.get_magnitude_slot(cand_slot) else {
                continue;
            };

            let redundant = selected_repr.iter().any(|(sel_vec, sel_mag)| {
                let dist_to_selected = -self.metric.similarity(&cand_vec, sel_vec, cand_mag, *sel_mag);
                dist_to_selected < cand_dist
            });

            if !redundant {
                selected.push(cand_slot);
                selected_repr.push((cand_vec, cand_mag));
            }
        }

        if selected.len() < max_neighbors {
            for &(cand_slot, _) in candidates {
                if selected.len() >= max_neighbors {
                    break;
                }
                if !selected.contains(&cand_slot) {
                    selected.push(cand_slot);
                }
            }
        }

        selected
    }

    fn add_bidirectional(&self, buffer: &VectorBuffer, new_slot: Slot, neighbor: Slot, layer: usize, max_conn: usize) {
        let Ok(neighbor_vec) = buffer.get_slot(neighbor) else {
            return;
        };
        let Ok(neighbor_mag) = buffer.get_magnitude_slot(neighbor) else {
            return;
        };

        let current = self.layers.read()[layer].get_neighbors(neighbor);
        if current.len() < max_conn {
            let mut updated = current;
            if !updated.contains(&new_slot) {
                updated.push(new_slot);
            }
            self.layers.read()[layer].set_neighbors(neighbor, updated);
            return;
        }

        let mut all = current;
        if !all.contains(&new_slot) {
            all.push(new_slot);
        }

        let mut with_dist: Vec<(Slot, f32)> = all
            .into_iter()
            .filter_map(|s| {
                let v = buffer.get_slot(s).ok()?;
                let m = buffer.get_magnitude_slot(s).ok()?;
                let dist = -self.metric.similarity(&neighbor_vec, &v, neighbor_mag, m);
                Some((s, dist))
            })
            .collect();
        with_dist.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let trimmed = self.select_neighbors(buffer, &neighbor_vec, neighbor_mag, &with_dist, max_conn);
        self.layers.read()[layer].set_neighbors(neighbor, trimmed);
    }

    fn exhaustive_scan(&self, buffer: &VectorBuffer, query: &[f32], query_mag: f32, k: usize) -> Vec<(Slot, f32)> {
        let levels = self.levels.read();
        let mut scored: Vec<(Slot, f32)> = levels
            .keys()
            .filter_map(|&slot| {
                let v = buffer.get_slot(slot).ok()?;
                let m = buffer.get_magnitude_slot(slot).ok()?;
                Some((slot, self.metric.similarity(query, &v, query_mag, m)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VectorId;

    const DIM: usize = 8;

    fn setup(capacity: usize) -> (VectorBuffer, HnswIndex) {
        let buffer = VectorBuffer::new(capacity * DIM * 4, DIM);
        let mut params = HnswParams::new(8, 64, 32);
        params.index_threshold = 0; // force graph search path in unit tests
        let index = HnswIndex::new(params, DistanceMetric::Cosine);
        (buffer, index)
    }

    fn unit(dim_pos: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[dim_pos] = 1.0;
        v
    }

    #[test]
    fn search_on_empty_index_is_empty_not_error() {
        let (buffer, index) = setup(4);
        assert!(index.search(&buffer, &unit(0), 5, 10).is_empty());
    }

    #[test]
    fn finds_exact_match_and_orthogonal_runner_up() {
        let (buffer, index) = setup(8);

        let a = VectorId::new();
        let b = VectorId::new();
        let c = VectorId::new();

        let slot_a = buffer.insert(a, &unit(0)).unwrap();
        index.insert(slot_a, &buffer).unwrap();

        let slot_b = buffer.insert(b, &unit(1)).unwrap();
        index.insert(slot_b, &buffer).unwrap();

        let mut diag = vec![0.0; DIM];
        diag[0] = 1.0 / std::f32::consts::SQRT_2;
        diag[1] = 1.0 / std::f32::consts::SQRT_2;
        let slot_c = buffer.insert(c, &diag).unwrap();
        index.insert(slot_c, &buffer).unwrap();

        let results = index.search(&buffer, &unit(0), 2, 32);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, slot_a);
        assert!((results[0].1 - 1.0).abs() < 1e-5);
        assert_eq!(results[1].0, slot_c);
        assert!((results[1].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn deleted_node_never_appears_in_results() {
        let (buffer, index) = setup(16);
        let mut slots = Vec::new();
        for i in 0..10 {
            let id = VectorId::new();
            let mut v = vec![0.0; DIM];
            v[i % DIM] = 1.0;
            v[(i + 1) % DIM] = 0.1;
            let slot = buffer.insert(id, &v).unwrap();
            index.insert(slot, &buffer).unwrap();
            slots.push((id, slot));
        }

        let (_, doomed_slot) = slots[3];
        index.delete(doomed_slot).unwrap();
        buffer.delete(slots[3].0).unwrap();

        let results = index.search(&buffer, &unit(0), 10, 32);
        assert!(results.iter().all(|(s, _)| *s != doomed_slot));
    }

    #[test]
    fn entry_point_promotion_after_deleting_the_entry_point() {
        let (buffer, index) = setup(16);
        let mut slots = Vec::new();
        for i in 0..12 {
            let id = VectorId::new();
            let mut v = vec![0.0; DIM];
            v[i % DIM] = 1.0;
            let slot = buffer.insert(id, &v).unwrap();
            index.insert(slot, &buffer).unwrap();
            slots.push(slot);
        }

        let (entry_slot, _) = index.entry_point.read().unwrap();
        index.delete(entry_slot).unwrap();

        if index.len() > 0 {
            let (new_entry, _) = index.entry_point.read().unwrap();
            assert_ne!(new_entry, entry_slot);
            assert!(index.contains(new_entry));
        }
    }

    #[test]
    fn threshold_fallback_matches_exhaustive_top_k() {
        let buffer = VectorBuffer::new(64 * DIM * 4, DIM);
        let params = HnswParams::new(8, 64, 32); // default index_threshold = 1000
        let index = HnswIndex::new(params, DistanceMetric::Cosine);

        for i in 0..20 {
            let id = VectorId::new();
            let mut v = vec![0.0; DIM];
            v[i % DIM] = 1.0;
            v[(i + 3) % DIM] = 0.3;
            let slot = buffer.insert(id, &v).unwrap();
            index.insert(slot, &buffer).unwrap();
        }

        let results = index.search(&buffer, &unit(0), 5, 16);
        let mut sims: Vec<f32> = results.iter().map(|(_, s)| *s).collect();
        let mut sorted = sims.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        sims.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(sims, sorted);
        assert_eq!(results.len(), 5);
    }
}
