//! `HNSWIndex` — a hierarchical navigable small world graph over buffer slots.
//!
//! The index stores only adjacency lists; vector data always comes from the
//! [`crate::buffer::VectorBuffer`] it is paired with. See spec §4.3.

mod index;
mod layer;
mod ordered_float;
mod params;

pub use index::HnswIndex;
pub use params::HnswParams;
