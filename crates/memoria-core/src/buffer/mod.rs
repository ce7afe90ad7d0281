//! `VectorBuffer` — a fixed-capacity, slot-indexed store of dense vectors.
//!
//! A flat `capacity * dimensions` block of `f32`, partitioned into
//! fixed-width slots. Slots are recycled after deletion; `VectorId`s are
//! never reused. See spec §4.1 for the full contract.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::distance::magnitude;
use crate::error::{Error, Result};

/// Opaque, stable identifier for a stored vector. Never reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorId(pub Uuid);

impl VectorId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the contiguous vector buffer.
pub type Slot = usize;

/// Usage metrics for a [`VectorBuffer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStats {
    /// Maximum number of vectors the buffer can hold.
    pub capacity: usize,
    /// Number of currently occupied slots.
    pub occupied: usize,
    /// Number of slots on the free list, available for immediate reuse.
    pub free: usize,
    /// Declared dimensionality of every stored vector.
    pub dimensions: usize,
    /// Total bytes backing the flat buffer (`capacity * dimensions * 4`).
    pub bytes_allocated: usize,
}

struct Inner {
    /// Flat storage: slot `s` occupies `data[s*dim .. (s+1)*dim]`.
    data: Vec<f32>,
    /// Cached Euclidean norm per slot; valid only while the slot is occupied.
    magnitudes: Vec<f32>,
    /// Reverse mapping for iteration; `None` when the slot is free.
    slot_to_id: Vec<Option<VectorId>>,
}

/// A fixed-capacity, slot-indexed buffer of equal-dimensional vectors.
///
/// Construction derives `capacity = floor(max_memory_bytes / (dimensions * 4))`.
/// Many readers may call [`get`](Self::get)/[`iterate`](Self::iterate)
/// concurrently; [`insert`](Self::insert)/[`replace`](Self::replace)/
/// [`delete`](Self::delete) take an exclusive lock and are serialized with
/// both readers and each other.
pub struct VectorBuffer {
    dimensions: usize,
    capacity: usize,
    inner: RwLock<Inner>,
    id_to_slot: DashMap<VectorId, Slot>,
    free_slots: Mutex<Vec<Slot>>,
    next_slot: AtomicUsize,
}

impl VectorBuffer {
    /// Creates a buffer sized to hold as many `dimensions`-wide vectors as
    /// fit in `max_memory_bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `dimensions` is zero.
    #[must_use]
    pub fn new(max_memory_bytes: usize, dimensions: usize) -> Self {
        assert!(dimensions > 0, "dimensions must be positive");
        let vector_bytes = dimensions * std::mem::size_of::<f32>();
        let capacity = max_memory_bytes / vector_bytes.max(1);
        Self {
            dimensions,
            capacity,
            inner: RwLock::new(Inner {
                data: vec![0.0; capacity * dimensions],
                magnitudes: vec![0.0; capacity],
                slot_to_id: vec![None; capacity],
            }),
            id_to_slot: DashMap::new(),
            free_slots: Mutex::new(Vec::new()),
            next_slot: AtomicUsize::new(0),
        }
    }

    /// Declared dimensionality of every vector in this buffer.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Maximum number of vectors this buffer can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently occupied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    /// True if no vectors are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn allocate_slot(&self) -> Result<Slot> {
        if let Some(slot) = self.free_slots.lock().unwrap().pop() {
            return Ok(slot);
        }
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            // Undo the speculative bump so a later free/retry can still succeed.
            self.next_slot.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::Capacity(format!(
                "buffer full: capacity {} exhausted",
                self.capacity
            )));
        }
        Ok(slot)
    }

    /// Writes `vector` into a freshly allocated slot, returning that slot.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `vector.len() != self.dimensions()`, or
    /// `Capacity` if every slot is occupied.
    pub fn insert(&self, id: VectorId, vector: &[f32]) -> Result<Slot> {
        self.check_dimension(vector)?;
        let slot = self.allocate_slot()?;
        let mag = magnitude(vector);

        let mut inner = self.inner.write();
        let start = slot * self.dimensions;
        inner.data[start..start + self.dimensions].copy_from_slice(vector);
        inner.magnitudes[slot] = mag;
        inner.slot_to_id[slot] = Some(id);
        drop(inner);

        self.id_to_slot.insert(id, slot);
        Ok(slot)
    }

    /// Overwrites the vector stored at `id` in place, recomputing its
    /// magnitude. The `VectorId` and slot are unchanged.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not present, or `DimensionMismatch` if
    /// `vector.len() != self.dimensions()`.
    pub fn replace(&self, id: VectorId, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;

        let mag = magnitude(vector);
        let mut inner = self.inner.write();
        let start = slot * self.dimensions;
        inner.data[start..start + self.dimensions].copy_from_slice(vector);
        inner.magnitudes[slot] = mag;
        Ok(())
    }

    /// Returns a copy of the vector stored at `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not present.
    pub fn get(&self, id: VectorId) -> Result<Vec<f32>> {
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;
        self.get_slot(slot)
    }

    /// Returns a copy of the vector at a known-occupied slot. Used by the
    /// index layer, which addresses vectors by slot rather than id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot is out of range or currently free.
    pub fn get_slot(&self, slot: Slot) -> Result<Vec<f32>> {
        let inner = self.inner.read();
        if slot >= self.capacity || inner.slot_to_id[slot].is_none() {
            return Err(Error::NotFound(format!("slot {slot}")));
        }
        let start = slot * self.dimensions;
        Ok(inner.data[start..start + self.dimensions].to_vec())
    }

    /// Returns the cached Euclidean norm for the vector stored at `id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not present.
    pub fn get_magnitude(&self, id: VectorId) -> Result<f32> {
        let slot = *self
            .id_to_slot
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;
        Ok(self.inner.read().magnitudes[slot])
    }

    /// Returns the cached Euclidean norm for a known-occupied slot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot is out of range or currently free.
    pub fn get_magnitude_slot(&self, slot: Slot) -> Result<f32> {
        let inner = self.inner.read();
        if slot >= self.capacity || inner.slot_to_id[slot].is_none() {
            return Err(Error::NotFound(format!("slot {slot}")));
        }
        Ok(inner.magnitudes[slot])
    }

    /// Looks up the slot currently backing `id`, without reading the vector.
    #[must_use]
    pub fn slot_of(&self, id: VectorId) -> Option<Slot> {
        self.id_to_slot.get(&id).map(|s| *s)
    }

    /// Looks up the `VectorId` currently occupying `slot`, if any.
    #[must_use]
    pub fn id_at_slot(&self, slot: Slot) -> Option<VectorId> {
        let inner = self.inner.read();
        inner.slot_to_id.get(slot).copied().flatten()
    }

    /// Frees the slot backing `id`, queuing it for reuse. The vector's
    /// bytes are left in place (harmless, since the slot is unreachable
    /// until reallocated) but the magnitude is cleared defensively.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not present.
    pub fn delete(&self, id: VectorId) -> Result<()> {
        let (_, slot) = self
            .id_to_slot
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("vector {id}")))?;

        let mut inner = self.inner.write();
        inner.slot_to_id[slot] = None;
        inner.magnitudes[slot] = 0.0;
        drop(inner);

        self.free_slots.lock().unwrap().push(slot);
        Ok(())
    }

    /// Returns a snapshot of every `(VectorId, Slot)` pair currently
    /// occupied, in unspecified order.
    #[must_use]
    pub fn iterate(&self) -> Vec<(VectorId, Slot)> {
        self.id_to_slot
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Returns current usage metrics.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            occupied: self.len(),
            free: self.free_slots.lock().unwrap().len(),
            dimensions: self.dimensions,
            bytes_allocated: self.capacity * self.dimensions * std::mem::size_of::<f32>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_buffer(capacity: usize, dim: usize) -> VectorBuffer {
        VectorBuffer::new(capacity * dim * 4, dim)
    }

    #[test]
    fn insert_and_get_round_trips_bit_exact() {
        let buf = small_buffer(4, 8);
        let id = VectorId::new();
        let v = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        buf.insert(id, &v).unwrap();
        assert_eq!(buf.get(id).unwrap(), v);
    }

    #[test]
    fn magnitude_matches_euclidean_norm_within_tolerance() {
        let buf = small_buffer(4, 4);
        let id = VectorId::new();
        let v = vec![3.0, 4.0, 0.0, 0.0];
        buf.insert(id, &v).unwrap();
        let expected: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        let got = buf.get_magnitude(id).unwrap();
        assert!((got - expected).abs() / expected <= 1e-5);
    }

    #[test]
    fn dimension_mismatch_rejected_without_mutation() {
        let buf = small_buffer(4, 4);
        let id = VectorId::new();
        let err = buf.insert(id, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(buf.len(), 0);
        assert!(buf.slot_of(id).is_none());
    }

    #[test]
    fn buffer_full_after_capacity_reached() {
        let buf = small_buffer(2, 4);
        buf.insert(VectorId::new(), &[0.0; 4]).unwrap();
        buf.insert(VectorId::new(), &[0.0; 4]).unwrap();
        let err = buf.insert(VectorId::new(), &[0.0; 4]).unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[test]
    fn slot_recycling_after_insert_delete_insert() {
        let buf = small_buffer(2, 4);
        let a = VectorId::new();
        buf.insert(a, &[1.0; 4]).unwrap();
        let stats_after_first = buf.stats();

        buf.delete(a).unwrap();
        let b = VectorId::new();
        buf.insert(b, &[2.0; 4]).unwrap();

        let stats_after_recycle = buf.stats();
        assert_eq!(stats_after_first.occupied, stats_after_recycle.occupied);
        assert!(buf.slot_of(a).is_none());
        assert!(buf.get(a).is_err());
    }

    #[test]
    fn replace_updates_vector_and_magnitude_not_id() {
        let buf = small_buffer(2, 4);
        let id = VectorId::new();
        buf.insert(id, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        buf.replace(id, &[0.0, 2.0, 0.0, 0.0]).unwrap();
        assert_eq!(buf.get(id).unwrap(), vec![0.0, 2.0, 0.0, 0.0]);
        assert!((buf.get_magnitude(id).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn not_found_errors_on_unknown_id() {
        let buf = small_buffer(2, 4);
        let id = VectorId::new();
        assert!(matches!(buf.get(id).unwrap_err(), Error::NotFound(_)));
        assert!(matches!(buf.delete(id).unwrap_err(), Error::NotFound(_)));
        assert!(matches!(
            buf.replace(id, &[0.0; 4]).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn iterate_reflects_occupied_slots_only() {
        let buf = small_buffer(3, 4);
        let a = VectorId::new();
        let b = VectorId::new();
        buf.insert(a, &[0.0; 4]).unwrap();
        buf.insert(b, &[0.0; 4]).unwrap();
        let mut ids: Vec<VectorId> = buf.iterate().into_iter().map(|(id, _)| id).collect();
        ids.sort_by_key(|id| id.0);
        let mut expected = vec![a, b];
        expected.sort_by_key(|id| id.0);
        assert_eq!(ids, expected);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: a vector of the declared dimensionality always round-trips
        /// bit-exact through insert/get, regardless of its values.
        #[test]
        fn prop_insert_get_round_trips(
            values in proptest::collection::vec(-1000.0f32..1000.0, 8)
        ) {
            let buf = small_buffer(4, 8);
            let id = VectorId::new();
            buf.insert(id, &values).unwrap();
            prop_assert_eq!(buf.get(id).unwrap(), values);
        }

        /// Property: any vector whose length disagrees with the buffer's
        /// dimensionality is rejected and never occupies a slot.
        #[test]
        fn prop_dimension_mismatch_never_mutates(
            len in 0usize..16,
        ) {
            prop_assume!(len != 8);
            let buf = small_buffer(4, 8);
            let id = VectorId::new();
            let v = vec![0.0f32; len];
            let err = buf.insert(id, &v).unwrap_err();
            prop_assert!(matches!(err, Error::DimensionMismatch { .. }));
            prop_assert_eq!(buf.len(), 0);
        }

        /// Property: for any sequence of insert/delete flags, occupied count
        /// never exceeds capacity and every live id still resolves to its
        /// own vector.
        #[test]
        fn prop_arbitrary_insert_delete_sequence_stays_consistent(
            ops in proptest::collection::vec(any::<bool>(), 1..64)
        ) {
            const CAP: usize = 8;
            let buf = small_buffer(CAP, 4);
            let mut live: Vec<VectorId> = Vec::new();

            for (i, insert) in ops.into_iter().enumerate() {
                if insert || live.is_empty() {
                    if buf.stats().occupied >= CAP {
                        continue;
                    }
                    let id = VectorId::new();
                    let v = vec![i as f32; 4];
                    buf.insert(id, &v).unwrap();
                    live.push(id);
                } else {
                    let id = live.swap_remove(0);
                    buf.delete(id).unwrap();
                }
            }

            prop_assert!(buf.stats().occupied <= CAP);
            for id in &live {
                prop_assert!(buf.get(*id).is_ok());
            }
        }
    }
}
