//! `IndexedVectorStore` — composes the buffer, the HNSW index, and the
//! metadata store into the facade the persona memory manager builds on.
//! See spec §4.4.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::buffer::{Slot, VectorBuffer, VectorId};
use crate::distance::{magnitude, DistanceMetric};
use crate::error::{Error, Result};
use crate::index::{HnswIndex, HnswParams};
use crate::metadata::{MemoryRecord, MemoryType, MetadataStore, PersonaId};

/// Metadata-keyed filters applied after similarity ranking (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub persona_id: Option<PersonaId>,
    pub memory_types: Option<FxHashSet<MemoryType>>,
    /// Reject hits older than this many milliseconds, measured against
    /// `now_ms`. The core never reads the wall clock itself — see
    /// `DESIGN.md` for why "now" is always an explicit parameter.
    pub max_age_ms: Option<u64>,
}

/// Options accepted by [`IndexedVectorStore::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    /// Per-query candidate-list width override; defaults to the index's
    /// configured `ef_search`.
    pub ef: Option<usize>,
    /// Per-query metric override. If set and different from the store's
    /// configured metric, bypasses the graph (whose topology was built for
    /// the configured metric) and falls back to an exhaustive scan scored
    /// with the requested metric.
    pub metric: Option<DistanceMetric>,
    pub filters: SearchFilters,
    pub include_values: bool,
    pub include_metadata: bool,
    pub now_ms: u64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: 0.0,
            ef: None,
            metric: None,
            filters: SearchFilters::default(),
            include_values: false,
            include_metadata: true,
            now_ms: 0,
        }
    }
}

/// A single search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: VectorId,
    pub similarity: f32,
    pub vector: Option<Vec<f32>>,
    pub metadata: Option<MemoryRecord>,
}

/// Usage metrics for the whole store.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub capacity: usize,
    pub occupied: usize,
    pub indexed: usize,
    pub dimensions: usize,
}

/// Composes [`VectorBuffer`] + [`HnswIndex`] + a [`MetadataStore`] behind a
/// single store-wide reader/writer lock, per spec §5: searches take the
/// read side, insert/delete/update take the write side; metadata-store
/// access always happens outside the lock.
pub struct IndexedVectorStore {
    buffer: VectorBuffer,
    index: HnswIndex,
    metadata: Arc<dyn MetadataStore>,
    guard: RwLock<()>,
}

impl IndexedVectorStore {
    /// Builds a store sized for `max_memory_bytes` at `dimensions`, using
    /// `metric` for ranking and `params` for the HNSW graph.
    #[must_use]
    pub fn new(
        max_memory_bytes: usize,
        dimensions: usize,
        metric: DistanceMetric,
        params: HnswParams,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            buffer: VectorBuffer::new(max_memory_bytes, dimensions),
            index: HnswIndex::new(params, metric),
            metadata,
            guard: RwLock::new(()),
        }
    }

    /// Inserts a vector and its metadata record as a single unit: buffer
    /// write, then index link, then metadata persist, in that order,
    /// rolling back every prior step on failure (spec §3 lifecycle).
    ///
    /// # Errors
    /// Propagates `DimensionMismatch`/`Capacity` from the buffer, or
    /// whatever the metadata store surfaces; the vector and index entry are
    /// rolled back before any such error returns.
    pub fn add_vector(&self, id: VectorId, vector: &[f32], record: MemoryRecord) -> Result<()> {
        tracing::debug!("store: acquiring write lock to insert vector {id}");
        let _write = self.guard.write();

        let slot = self.buffer.insert(id, vector)?;
        if let Err(err) = self.index.insert(slot, &self.buffer) {
            tracing::warn!("store: index insert failed for vector {id}, rolling back: {err}");
            let _ = self.buffer.delete(id);
            return Err(err);
        }
        drop(_write);

        if let Err(err) = self.metadata.put(record) {
            tracing::warn!("store: metadata put failed for vector {id}, rolling back: {err}");
            let _write = self.guard.write();
            let _ = self.index.delete(slot);
            let _ = self.buffer.delete(id);
            return Err(err);
        }
        tracing::debug!("store: inserted vector {id} at slot {slot:?}");
        Ok(())
    }

    /// Returns a copy of the stored vector.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not present.
    pub fn get_vector(&self, id: VectorId) -> Result<Vec<f32>> {
        let _read = self.guard.read();
        self.buffer.get(id)
    }

    /// Removes a vector, its index entry, and its metadata record.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not present.
    pub fn delete_vector(&self, id: VectorId) -> Result<()> {
        tracing::debug!("store: acquiring write lock to delete vector {id}");
        let slot = {
            let _write = self.guard.write();
            let slot = self
                .buffer
                .slot_of(id)
                .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;
            self.index.delete(slot)?;
            self.buffer.delete(id)?;
            slot
        };
        let _ = slot;
        tracing::debug!("store: deleted vector {id}");
        self.metadata.delete(id)
    }

    /// Replaces a vector's value in place, keeping its `VectorId` and slot.
    /// Reindexes the node so the graph's neighbor lists stay accurate for
    /// its new position.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not present, or `DimensionMismatch` if
    /// `vector.len()` disagrees with the store's dimensionality.
    pub fn update_vector(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        let _write = self.guard.write();
        let slot = self
            .buffer
            .slot_of(id)
            .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;
        // Validate and unlink before touching storage so a bad vector never
        // leaves the node mid-reindex.
        if vector.len() != self.buffer.dimensions() {
            return Err(Error::DimensionMismatch {
                expected: self.buffer.dimensions(),
                actual: vector.len(),
            });
        }
        self.index.delete(slot)?;
        self.buffer.replace(id, vector)?;
        self.index.insert(slot, &self.buffer)
    }

    /// Searches for `query`'s nearest neighbors, applying `options.filters`
    /// after similarity ranking and returning the first `options.limit`
    /// hits that pass both the filters and `options.threshold`.
    #[must_use]
    pub fn search(&self, query: &[f32], options: &SearchOptions) -> Vec<SearchHit> {
        let fetch_width = (options.limit * 3).max(options.ef.unwrap_or_else(|| self.index.default_ef()));
        let ef = options.ef.unwrap_or_else(|| self.index.default_ef());

        let candidates: Vec<(VectorId, f32, Option<Vec<f32>>)> = {
            let _read = self.guard.read();
            let raw = self.raw_candidates(query, fetch_width, ef, options.metric);
            raw.into_iter()
                .filter_map(|(slot, similarity)| {
                    let id = self.buffer.id_at_slot(slot)?;
                    let vector = options.include_values.then(|| self.buffer.get_slot(slot).ok()).flatten();
                    Some((id, similarity, vector))
                })
                .collect()
        };

        let mut hits = Vec::with_capacity(options.limit);
        for (id, similarity, vector) in candidates {
            if hits.len() >= options.limit {
                break;
            }
            if similarity < options.threshold {
                continue;
            }

            let record = match self.metadata.get(id) {
                Ok(record) => record,
                Err(_) => continue, // race with a concurrent delete; skip
            };

            if let Some(persona_id) = options.filters.persona_id {
                if record.persona_id != persona_id {
                    continue;
                }
            }
            if let Some(types) = &options.filters.memory_types {
                if !types.contains(&record.memory_type) {
                    continue;
                }
            }
            if let Some(max_age_ms) = options.filters.max_age_ms {
                let age = options.now_ms.saturating_sub(record.timestamp_ms);
                if age > max_age_ms {
                    continue;
                }
            }

            hits.push(SearchHit {
                id,
                similarity,
                vector,
                metadata: options.include_metadata.then_some(record),
            });
        }
        hits
    }

    /// Current usage metrics across the buffer and index.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let _read = self.guard.read();
        let buffer_stats = self.buffer.stats();
        StoreStats {
            capacity: buffer_stats.capacity,
            occupied: buffer_stats.occupied,
            indexed: self.index.len(),
            dimensions: buffer_stats.dimensions,
        }
    }

    /// Shared reference to the underlying metadata store, used by the
    /// persona layer for operations the store facade doesn't itself expose
    /// (listing, counting, cascading persona deletes).
    #[must_use]
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Declared vector dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.buffer.dimensions()
    }

    fn raw_candidates(
        &self,
        query: &[f32],
        fetch_width: usize,
        ef: usize,
        metric_override: Option<DistanceMetric>,
    ) -> Vec<(Slot, f32)> {
        match metric_override {
            Some(metric) if metric != self.index.metric() => {
                let query_mag = magnitude(query);
                let mut scored: Vec<(Slot, f32)> = self
                    .buffer
                    .iterate()
                    .into_iter()
                    .filter_map(|(_, slot)| {
                        let vector = self.buffer.get_slot(slot).ok()?;
                        let mag = self.buffer.get_magnitude_slot(slot).ok()?;
                        Some((slot, metric.similarity(query, &vector, query_mag, mag)))
                    })
                    .collect();
                scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
                scored.truncate(fetch_width);
                scored
            }
            _ => self.index.search(&self.buffer, query, fetch_width, ef),
        }
    }
}
