//! A single layer in the HNSW hierarchy: per-node adjacency lists.

use parking_lot::RwLock;

use crate::buffer::Slot;

/// One layer's adjacency lists, indexed by slot.
pub(super) struct Layer {
    neighbors: Vec<RwLock<Vec<Slot>>>,
}

impl Layer {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            neighbors: (0..capacity).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Grows the layer so slot `slot` has a backing adjacency list.
    pub(super) fn ensure_capacity(&mut self, slot: Slot) {
        while self.neighbors.len() <= slot {
            self.neighbors.push(RwLock::new(Vec::new()));
        }
    }

    pub(super) fn get_neighbors(&self, slot: Slot) -> Vec<Slot> {
        if slot < self.neighbors.len() {
            self.neighbors[slot].read().clone()
        } else {
            Vec::new()
        }
    }

    pub(super) fn set_neighbors(&self, slot: Slot, neighbors: Vec<Slot>) {
        if slot < self.neighbors.len() {
            *self.neighbors[slot].write() = neighbors;
        }
    }

    /// Removes `target` from `slot`'s adjacency list, if present.
    pub(super) fn unlink(&self, slot: Slot, target: Slot) {
        if slot < self.neighbors.len() {
            self.neighbors[slot].write().retain(|&n| n != target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let layer = Layer::new(4);
        layer.set_neighbors(1, vec![0, 2, 3]);
        assert_eq!(layer.get_neighbors(1), vec![0, 2, 3]);
    }

    #[test]
    fn out_of_range_reads_as_empty() {
        let layer = Layer::new(2);
        assert_eq!(layer.get_neighbors(5), Vec::<Slot>::new());
    }

    #[test]
    fn unlink_removes_single_occurrence() {
        let layer = Layer::new(2);
        layer.set_neighbors(0, vec![1, 1, 2]);
        layer.unlink(0, 1);
        assert_eq!(layer.get_neighbors(0), vec![2]);
    }

    #[test]
    fn ensure_capacity_grows_without_losing_data() {
        let mut layer = Layer::new(2);
        layer.set_neighbors(1, vec![0]);
        layer.ensure_capacity(4);
        assert_eq!(layer.get_neighbors(1), vec![0]);
        assert_eq!(layer.get_neighbors(4), Vec::<Slot>::new());
    }
}
